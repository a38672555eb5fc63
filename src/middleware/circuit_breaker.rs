//! Circuit breaker shared by every connection of a portal.
//!
//! The breaker has three states:
//!
//! - **Closed**: messages pass; each `error` message counts as a failure
//! - **Open**: every message is rejected until `reset_timeout` has passed
//!   since the last failure
//! - **HalfOpen**: messages pass; a `response` closes the breaker and clears
//!   the count, an `error` opens it again
//!
//! The `error` message that trips the breaker is itself let through.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Message, MessageType};
use crate::transport::Connection;

use super::Middleware;

// ============================================================================
// Configuration
// ============================================================================

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures that open the breaker.
    pub max_failures: u32,
    /// Time after the last failure before traffic is tried again.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// CircuitState
// ============================================================================

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Rejecting all traffic.
    Open,
    /// Probing for recovery.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

// ============================================================================
// CircuitBreakerMiddleware
// ============================================================================

/// Isolates a failing peer by rejecting traffic after repeated errors.
#[derive(Debug)]
pub struct CircuitBreakerMiddleware {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl Default for CircuitBreakerMiddleware {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerMiddleware {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns the failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }
}

impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn process_message(&self, _conn: &Connection, msg: &Message) -> Result<()> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let cooled = inner
                .last_failure
                .is_none_or(|at| now.saturating_duration_since(at) >= self.config.reset_timeout);
            if !cooled {
                return Err(Error::CircuitOpen);
            }
            inner.state = CircuitState::HalfOpen;
            info!("Circuit breaker half-open");
        }

        match (msg.kind, inner.state) {
            (MessageType::Error, CircuitState::HalfOpen) => {
                inner.failures = inner.failures.saturating_add(1);
                inner.last_failure = Some(now);
                inner.state = CircuitState::Open;
                warn!("Circuit breaker reopened after failure in half-open state");
            }
            (MessageType::Error, _) => {
                inner.failures = inner.failures.saturating_add(1);
                inner.last_failure = Some(now);
                if inner.failures >= self.config.max_failures {
                    inner.state = CircuitState::Open;
                    warn!(failures = inner.failures, "Circuit breaker opened");
                }
            }
            (MessageType::Response, CircuitState::HalfOpen) => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                info!("Circuit breaker closed");
            }
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
