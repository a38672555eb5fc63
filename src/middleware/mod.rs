//! Middleware pipeline.
//!
//! Interceptors observe or reject traffic at three points of a connection's
//! life: when it opens, for every message, and when it closes.
//!
//! # Ordering
//!
//! | Hook | Order | On failure |
//! |------|-------|------------|
//! | `process_connection` | registration order | stop, earlier stages unwound, connection aborted |
//! | `process_message` | registration order | stop, message dropped |
//! | `process_disconnection` | reverse order | logged, remaining stages still run |
//!
//! # Stages
//!
//! | Module | Description |
//! |--------|-------------|
//! | `logging` | Pure observer |
//! | `auth` | Bearer token, API key or custom check |
//! | `metrics` | Counters and call latency |
//! | `validation` | Message type allow-list, non-empty IDs |
//! | `rate_limit` | Per-connection token bucket |
//! | `circuit_breaker` | Shared closed/open/half-open breaker |
//! | `compression` | Compression settings and size accounting |
//! | `chain` | Ordered composite |
//! | `conditional` | Predicate-gated delegate |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::transport::Connection;

// ============================================================================
// Submodules
// ============================================================================

/// Authentication.
pub mod auth;

/// Ordered composite.
pub mod chain;

/// Circuit breaker.
pub mod circuit_breaker;

/// Compression settings.
pub mod compression;

/// Predicate-gated delegate.
pub mod conditional;

/// Structured logging.
pub mod logging;

/// Counters and latency.
pub mod metrics;

/// Token bucket rate limiting.
pub mod rate_limit;

/// Message shape validation.
pub mod validation;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::{AuthMiddleware, AuthStrategy};
pub use chain::Chain;
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMiddleware, CircuitState};
pub use compression::{CompressionConfig, CompressionMiddleware};
pub use conditional::ConditionalMiddleware;
pub use logging::LoggingMiddleware;
pub use metrics::{MetricsMiddleware, MetricsSnapshot};
pub use rate_limit::{RateLimitConfig, RateLimitMiddleware};
pub use validation::ValidationMiddleware;

// ============================================================================
// Middleware
// ============================================================================

/// Interceptor over connection and message events.
///
/// Hooks run on the connection's event loop, so they must not block.
pub trait Middleware: Send + Sync {
    /// Stage name used to tag failures.
    fn name(&self) -> &str;

    /// Inspects a message. An error drops the message.
    fn process_message(&self, conn: &Connection, msg: &Message) -> Result<()>;

    /// Runs when a connection opens. An error aborts the connection.
    fn process_connection(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }

    /// Runs when a connection closes. Errors are only logged.
    fn process_disconnection(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Stage Runners
// ============================================================================

/// Runs `process_message` in order, stopping at the first failure.
pub(crate) fn run_message(
    stages: &[Arc<dyn Middleware>],
    conn: &Connection,
    msg: &Message,
) -> Result<()> {
    for stage in stages {
        stage
            .process_message(conn, msg)
            .map_err(|e| Error::middleware(stage.name(), e))?;
    }
    Ok(())
}

/// Runs `process_connection` in order, stopping at the first failure.
///
/// Stages that already accepted the connection are then unwound with
/// `process_disconnection` in reverse order, so none keeps state for a
/// connection that never opened.
pub(crate) fn run_connection(stages: &[Arc<dyn Middleware>], conn: &Connection) -> Result<()> {
    for (accepted, stage) in stages.iter().enumerate() {
        if let Err(e) = stage.process_connection(conn) {
            if let Err(cleanup) = run_disconnection(&stages[..accepted], conn) {
                warn!(
                    connection_id = %conn.id(),
                    error = %cleanup,
                    "Unwinding refused connection failed"
                );
            }
            return Err(Error::middleware(stage.name(), e));
        }
    }
    Ok(())
}

/// Runs `process_disconnection` in reverse order, never stopping early.
///
/// Returns the first failure, if any.
pub(crate) fn run_disconnection(
    stages: &[Arc<dyn Middleware>],
    conn: &Connection,
) -> Result<()> {
    let mut first = None;
    for stage in stages.iter().rev() {
        if let Err(e) = stage.process_disconnection(conn) {
            first.get_or_insert(Error::middleware(stage.name(), e));
        }
    }
    first.map_or(Ok(()), Err)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Ordered set of middleware shared by every connection of a portal.
///
/// Clones share the same stage list. Each hook runs against a snapshot, so
/// stages added later only affect events that start afterwards.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Arc<RwLock<Vec<Arc<dyn Middleware>>>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    pub fn push(&self, stage: Arc<dyn Middleware>) {
        self.stages.write().push(stage);
    }

    /// Returns the number of stages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.read().len()
    }

    /// Returns `true` if there are no stages.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.read().is_empty()
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.stages.read().iter().map(|s| s.name().to_string()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.stages.read().clone()
    }

    /// Runs every stage's `process_message`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Middleware`] tagged with the rejecting stage.
    pub fn process_message(&self, conn: &Connection, msg: &Message) -> Result<()> {
        run_message(&self.snapshot(), conn, msg)
    }

    /// Runs every stage's `process_connection`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Middleware`] tagged with the rejecting stage.
    pub fn process_connection(&self, conn: &Connection) -> Result<()> {
        run_connection(&self.snapshot(), conn)
    }

    /// Runs every stage's `process_disconnection` in reverse order.
    ///
    /// Failures are logged and never returned.
    pub fn process_disconnection(&self, conn: &Connection) {
        if let Err(e) = run_disconnection(&self.snapshot(), conn) {
            warn!(connection_id = %conn.id(), error = %e, "Disconnect middleware failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
