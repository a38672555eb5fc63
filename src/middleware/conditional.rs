//! Predicate-gated middleware.

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::Message;
use crate::transport::Connection;

use super::Middleware;

/// Decides whether the wrapped stage sees a message.
pub type Predicate = Arc<dyn Fn(&Connection, &Message) -> bool + Send + Sync>;

/// Applies the wrapped stage only to messages matching a predicate.
///
/// Connection and disconnection hooks always reach the wrapped stage.
#[derive(Clone)]
pub struct ConditionalMiddleware {
    inner: Arc<dyn Middleware>,
    predicate: Predicate,
}

impl ConditionalMiddleware {
    /// Wraps `inner` behind `predicate`.
    #[must_use]
    pub fn new<F>(inner: impl Middleware + 'static, predicate: F) -> Self
    where
        F: Fn(&Connection, &Message) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(inner),
            predicate: Arc::new(predicate),
        }
    }
}

impl Middleware for ConditionalMiddleware {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn process_message(&self, conn: &Connection, msg: &Message) -> Result<()> {
        if (self.predicate)(conn, msg) {
            self.inner.process_message(conn, msg)
        } else {
            Ok(())
        }
    }

    fn process_connection(&self, conn: &Connection) -> Result<()> {
        self.inner.process_connection(conn)
    }

    fn process_disconnection(&self, conn: &Connection) -> Result<()> {
        self.inner.process_disconnection(conn)
    }
}
