//! Logging middleware. Never fails.

use tracing::{debug, info, trace};

use crate::error::Result;
use crate::protocol::Message;
use crate::transport::Connection;

use super::Middleware;

/// Logs connection events and message headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware {
    log_payloads: bool,
}

impl LoggingMiddleware {
    /// Creates a logger that omits params and results.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            log_payloads: false,
        }
    }

    /// Also logs params and results at trace level.
    #[inline]
    #[must_use]
    pub const fn with_payloads(mut self) -> Self {
        self.log_payloads = true;
        self
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn process_message(&self, conn: &Connection, msg: &Message) -> Result<()> {
        debug!(
            connection_id = %conn.id(),
            id = %msg.id,
            kind = msg.kind.as_str(),
            function = msg.function.as_deref().unwrap_or(""),
            "Message"
        );
        if self.log_payloads {
            trace!(
                id = %msg.id,
                params = ?msg.params,
                result = ?msg.result,
                error = ?msg.error,
                "Message payload"
            );
        }
        Ok(())
    }

    fn process_connection(&self, conn: &Connection) -> Result<()> {
        info!(
            connection_id = %conn.id(),
            address = %conn.address(),
            role = ?conn.role(),
            "Connection opened"
        );
        Ok(())
    }

    fn process_disconnection(&self, conn: &Connection) -> Result<()> {
        info!(
            connection_id = %conn.id(),
            address = %conn.address(),
            pending = conn.pending_count(),
            "Connection closed"
        );
        Ok(())
    }
}
