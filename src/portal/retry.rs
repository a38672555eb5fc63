//! Bounded retries around a call.
//!
//! An operation runs up to `max_retries + 1` times with a fixed pause between
//! attempts. Errors that [`Error::is_retryable`] rejects end the loop at once;
//! otherwise the last error is returned when attempts run out. The pause is
//! cut short when the caller's [`Context`] finishes.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};

use super::PortalConfig;

/// Retry bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Reads the bounds from a portal configuration.
    #[inline]
    #[must_use]
    pub fn from_config(config: &PortalConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay)
    }

    /// Runs `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `op` receives the zero-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, the last error once attempts
    /// are exhausted, or a timeout error if `ctx` finishes during a pause.
    pub async fn run<T, F, Fut>(&self, ctx: &Context, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                debug!(attempt, error = %err, "Terminal error, not retrying");
                return Err(err);
            }
            if attempt >= self.max_retries {
                warn!(attempts = attempt + 1, error = %err, "All retries exhausted");
                return Err(err);
            }

            warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = self.delay.as_millis() as u64,
                error = %err,
                "Retrying call after failure"
            );

            tokio::select! {
                () = sleep(self.delay) => {}
                () = ctx.done() => return Err(Error::cancelled("retry delay")),
            }
            attempt += 1;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::FunctionError;

    fn counting<T: Send + 'static>(
        counter: &Arc<AtomicU32>,
        outcome: impl Fn(u32) -> Result<T> + Send + 'static,
    ) -> impl FnMut(u32) -> std::future::Ready<Result<T>> {
        let counter = Arc::clone(counter);
        move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(outcome(attempt))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let result: Result<()> = policy
            .run(&Context::new(), counting(&calls, |_| Err(Error::network("reset"))))
            .await;

        assert!(matches!(result, Err(Error::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let result: Result<()> = policy
            .run(
                &Context::new(),
                counting(&calls, |_| Err(FunctionError::bad_request("nope").into())),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let result = policy
            .run(
                &Context::new(),
                counting(&calls, |attempt| {
                    if attempt < 2 {
                        Err(FunctionError::internal("flaky").into())
                    } else {
                        Ok(attempt)
                    }
                }),
            )
            .await;

        assert_eq!(result.expect("third attempt succeeds"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_and_protocol_are_terminal() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let terminal: [fn(&'static str) -> Error; 2] = [Error::validation, Error::protocol];
        for make in terminal {
            let calls = Arc::new(AtomicU32::new(0));
            let _: Result<()> = policy
                .run(&Context::new(), counting(&calls, move |_| Err(make("bad"))))
                .await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_aborts_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let ctx = Context::new();
        ctx.cancel();

        let result: Result<()> = policy
            .run(&ctx, counting(&calls, |_| Err(Error::network("reset"))))
            .await;

        assert!(result.expect_err("aborted").is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
