//! Authentication middleware.
//!
//! Checks credentials carried in message metadata headers. Only messages that
//! request work (`call`, `register`) are checked; replies and liveness frames
//! pass through.
//!
//! # Example
//!
//! ```ignore
//! portal.use_middleware(AuthMiddleware::bearer("s3cret"));
//!
//! let caller = Portal::new(
//!     PortalConfig::new().with_header("Authorization", "Bearer s3cret"),
//! )?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::protocol::{Message, MessageType};
use crate::transport::Connection;

use super::Middleware;

// ============================================================================
// Constants
// ============================================================================

/// Header carrying bearer tokens.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Default header carrying API keys.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

// ============================================================================
// AuthStrategy
// ============================================================================

/// Custom credential check. Returns `true` to accept.
pub type AuthValidator = Arc<dyn Fn(&Connection, &Message) -> bool + Send + Sync>;

/// How credentials are checked.
#[derive(Clone)]
pub enum AuthStrategy {
    /// `Authorization: Bearer {token}`, exact match.
    Bearer {
        /// Expected token.
        token: String,
    },
    /// `{header}: {key}`, exact match.
    ApiKey {
        /// Header name.
        header: String,
        /// Expected key.
        key: String,
    },
    /// Caller supplied check.
    Custom(AuthValidator),
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer { .. } => f.write_str("Bearer"),
            Self::ApiKey { header, .. } => write!(f, "ApiKey({header})"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

// ============================================================================
// AuthMiddleware
// ============================================================================

/// Rejects work requests without valid credentials.
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    strategy: AuthStrategy,
}

impl AuthMiddleware {
    /// Creates a middleware with the given strategy.
    #[inline]
    #[must_use]
    pub fn new(strategy: AuthStrategy) -> Self {
        Self { strategy }
    }

    /// Requires `Authorization: Bearer {token}`.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::new(AuthStrategy::Bearer {
            token: token.into(),
        })
    }

    /// Requires `X-API-Key: {key}`.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::api_key_header(DEFAULT_API_KEY_HEADER, key)
    }

    /// Requires `{header}: {key}`.
    #[must_use]
    pub fn api_key_header(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(AuthStrategy::ApiKey {
            header: header.into(),
            key: key.into(),
        })
    }

    /// Delegates to a custom check.
    #[must_use]
    pub fn custom<F>(validator: F) -> Self
    where
        F: Fn(&Connection, &Message) -> bool + Send + Sync + 'static,
    {
        Self::new(AuthStrategy::Custom(Arc::new(validator)))
    }

    fn check(&self, conn: &Connection, msg: &Message) -> Result<()> {
        match &self.strategy {
            AuthStrategy::Bearer { token } => {
                let header = msg
                    .metadata
                    .header(AUTHORIZATION_HEADER)
                    .ok_or_else(|| Error::authentication("missing Authorization header"))?;
                match header.strip_prefix("Bearer ") {
                    Some(presented) if presented == token => Ok(()),
                    _ => Err(Error::authentication("invalid bearer token")),
                }
            }
            AuthStrategy::ApiKey { header, key } => match msg.metadata.header(header) {
                Some(presented) if presented == key => Ok(()),
                Some(_) => Err(Error::authentication("invalid API key")),
                None => Err(Error::authentication(format!("missing {header} header"))),
            },
            AuthStrategy::Custom(validator) => {
                if validator(conn, msg) {
                    Ok(())
                } else {
                    Err(Error::authentication("rejected by custom validator"))
                }
            }
        }
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    fn process_message(&self, conn: &Connection, msg: &Message) -> Result<()> {
        if !matches!(msg.kind, MessageType::Call | MessageType::Register) {
            return Ok(());
        }
        self.check(conn, msg).inspect_err(|e| {
            warn!(connection_id = %conn.id(), id = %msg.id, error = %e, "Authentication failed");
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
