//! Message shape validation.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::protocol::{Message, MessageType};
use crate::transport::Connection;

use super::Middleware;

/// Extra per-message check.
pub type MessageValidator = Arc<dyn Fn(&Message) -> Result<()> + Send + Sync>;

/// Rejects messages with an empty ID, a type outside the allow-list, or a
/// `call` without a target function.
#[derive(Clone)]
pub struct ValidationMiddleware {
    allowed: FxHashSet<MessageType>,
    validator: Option<MessageValidator>,
}

impl fmt::Debug for ValidationMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationMiddleware")
            .field("allowed", &self.allowed)
            .field("custom", &self.validator.is_some())
            .finish()
    }
}

impl Default for ValidationMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationMiddleware {
    /// Allows every message type.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allowed: MessageType::ALL.into_iter().collect(),
            validator: None,
        }
    }

    /// Restricts the allowed message types.
    #[must_use]
    pub fn with_allowed_types(mut self, types: impl IntoIterator<Item = MessageType>) -> Self {
        self.allowed = types.into_iter().collect();
        self
    }

    /// Adds a custom check that runs after the built-in ones.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn process_message(&self, _conn: &Connection, msg: &Message) -> Result<()> {
        if msg.id.is_empty() {
            return Err(Error::validation("message id is empty"));
        }
        if !self.allowed.contains(&msg.kind) {
            return Err(Error::validation(format!(
                "message type '{}' is not allowed",
                msg.kind.as_str()
            )));
        }
        if msg.kind == MessageType::Call && msg.function.as_deref().is_none_or(str::is_empty) {
            return Err(Error::validation("call message without function"));
        }
        match &self.validator {
            Some(validator) => validator(msg),
            None => Ok(()),
        }
    }
}
