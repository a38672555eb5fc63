//! Ordered composite of middleware.

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::Message;
use crate::transport::Connection;

use super::{Middleware, run_connection, run_disconnection, run_message};

/// Runs its members as one stage.
///
/// Messages and connections stop at the first failing member. Disconnection
/// runs every member in reverse order and reports the first failure.
#[derive(Clone, Default)]
pub struct Chain {
    members: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    /// Creates an empty chain.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a member.
    #[must_use]
    pub fn with(mut self, member: impl Middleware + 'static) -> Self {
        self.members.push(Arc::new(member));
        self
    }

    /// Appends a shared member.
    #[must_use]
    pub fn with_shared(mut self, member: Arc<dyn Middleware>) -> Self {
        self.members.push(member);
        self
    }

    /// Returns the number of members.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the chain is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Middleware for Chain {
    fn name(&self) -> &str {
        "chain"
    }

    fn process_message(&self, conn: &Connection, msg: &Message) -> Result<()> {
        run_message(&self.members, conn, msg)
    }

    fn process_connection(&self, conn: &Connection) -> Result<()> {
        run_connection(&self.members, conn)
    }

    fn process_disconnection(&self, conn: &Connection) -> Result<()> {
        run_disconnection(&self.members, conn)
    }
}
