//! Error types for the WebSocket function portal.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_portal::{Context, Error, Result};
//!
//! async fn example(portal: &Portal, address: &str) -> Result<()> {
//!     match portal.call_function(&Context::new(), address, input).await {
//!         Err(Error::Function(err)) if err.is_client_error() => { /* bad input */ }
//!         other => { other?; }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Addressing | [`Error::Address`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Network`] |
//! | Protocol | [`Error::Message`], [`Error::Protocol`], [`Error::Validation`] |
//! | Execution | [`Error::Timeout`], [`Error::Function`], [`Error::NotFound`] |
//! | Middleware | [`Error::Middleware`], [`Error::Authentication`], [`Error::RateLimited`], [`Error::CircuitOpen`] |
//! | Setup | [`Error::Registration`], [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Status Codes
// ============================================================================

/// Status code for malformed or rejected input.
pub const CODE_BAD_REQUEST: i32 = 400;

/// Status code for failed authentication.
pub const CODE_UNAUTHORIZED: i32 = 401;

/// Status code for an unknown function.
pub const CODE_NOT_FOUND: i32 = 404;

/// Status code for a rate limited message.
pub const CODE_TOO_MANY_REQUESTS: i32 = 429;

/// Status code for an unexpected handler failure.
pub const CODE_INTERNAL: i32 = 500;

/// Status code for a stage that refuses traffic (open circuit).
pub const CODE_UNAVAILABLE: i32 = 503;

// ============================================================================
// FunctionError
// ============================================================================

/// Application error raised by a remote handler.
///
/// Carries a numeric status code analogous to HTTP so callers can branch
/// on client (4xx) versus server (5xx) failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub struct FunctionError {
    /// Application status code.
    pub code: i32,
    /// Human readable message.
    pub message: String,
    /// Optional extra detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function error {}: {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

impl FunctionError {
    /// Creates a function error with an explicit code.
    #[inline]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a 400 error.
    #[inline]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(CODE_BAD_REQUEST, message)
    }

    /// Creates a 500 error.
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL, message)
    }

    /// Attaches details.
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns `true` for codes in the 400..500 range.
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Returns `true` for codes in the 500..600 range.
    #[inline]
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }
}

// ============================================================================
// ErrorKind
// ============================================================================

/// Closed classification of [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed address or unsupported scheme.
    Address,
    /// Dial or handshake failure, or a closed connection.
    Connection,
    /// Send failure.
    Network,
    /// Decode or processing failure.
    Message,
    /// Unexpected message type.
    Protocol,
    /// Context cancelled or deadline exceeded.
    Timeout,
    /// Message shape violation.
    Validation,
    /// Interceptor failure.
    Middleware,
    /// Registration failure.
    Registration,
    /// Remote application error.
    Function,
    /// Invalid configuration.
    Config,
    /// Lookup of an unknown function.
    NotFound,
    /// I/O, JSON or WebSocket library failure.
    External,
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Addressing Errors
    // ========================================================================
    /// Malformed address or unsupported scheme.
    #[error("Invalid address '{address}': {message}")]
    Address {
        /// The offending address.
        address: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Dial or WebSocket handshake failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed while a call was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Writing a frame failed.
    #[error("Network error: {message}")]
    Network {
        /// Description of the send failure.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Frame could not be decoded or processed.
    #[error("Message error: {message}")]
    Message {
        /// Description of the failure.
        message: String,
    },

    /// Protocol violation, e.g. a non-pong reply to a ping.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Message shape violation.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the violation.
        message: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Context cancelled or deadline exceeded.
    #[error("Timeout: {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Milliseconds waited, when a deadline applied.
        timeout_ms: Option<u64>,
    },

    /// Remote application error.
    #[error(transparent)]
    Function(#[from] FunctionError),

    /// No function registered under the requested address.
    #[error("Function not found: {function}")]
    NotFound {
        /// The requested function.
        function: String,
    },

    // ========================================================================
    // Middleware Errors
    // ========================================================================
    /// A middleware stage rejected the message or connection.
    #[error("Middleware '{name}' failed: {source}")]
    Middleware {
        /// Name of the rejecting stage.
        name: String,
        /// Underlying failure.
        source: Box<Error>,
    },

    /// Credentials missing or wrong.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Description of the failure.
        message: String,
    },

    /// Token bucket empty.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Circuit breaker is open.
    #[error("Circuit breaker is open")]
    CircuitOpen,

    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// Registering a function failed.
    #[error("Registration failed: {message}")]
    Registration {
        /// Description of the failure.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an address error.
    #[inline]
    pub fn address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Address {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[inline]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a message error.
    #[inline]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a timeout error for an elapsed deadline.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: Some(timeout_ms),
        }
    }

    /// Creates a timeout error for a cancelled context.
    #[inline]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: None,
        }
    }

    /// Creates a not found error.
    #[inline]
    pub fn not_found(function: impl Into<String>) -> Self {
        Self::NotFound {
            function: function.into(),
        }
    }

    /// Wraps a failure raised by the named middleware.
    ///
    /// Errors that are already tagged keep their innermost stage name.
    pub fn middleware(name: impl Into<String>, source: Error) -> Self {
        match source {
            tagged @ Self::Middleware { .. } => tagged,
            other => Self::Middleware {
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    /// Creates an authentication error.
    #[inline]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a registration error.
    #[inline]
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Classification
// ============================================================================

impl Error {
    /// Returns the closed classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Address { .. } => ErrorKind::Address,
            Self::Connection { .. } | Self::ConnectionClosed => ErrorKind::Connection,
            Self::Network { .. } => ErrorKind::Network,
            Self::Message { .. } => ErrorKind::Message,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Function(_) => ErrorKind::Function,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Middleware { .. }
            | Self::Authentication { .. }
            | Self::RateLimited
            | Self::CircuitOpen => ErrorKind::Middleware,
            Self::Registration { .. } => ErrorKind::Registration,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) | Self::WebSocket(_) => ErrorKind::External,
        }
    }

    /// Returns `true` if another attempt may succeed.
    ///
    /// Terminal: 4xx function errors, validation and protocol errors, and
    /// middleware rejections whose cause is one of those.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Function(err) => !err.is_client_error(),
            Self::Validation { .. } | Self::Protocol { .. } => false,
            Self::Middleware { source, .. } => source.is_retryable(),
            _ => true,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::Network { .. } | Self::WebSocket(_)
        )
    }

    /// Returns the remote function error, if this is one.
    #[inline]
    #[must_use]
    pub fn as_function_error(&self) -> Option<&FunctionError> {
        match self {
            Self::Function(err) => Some(err),
            _ => None,
        }
    }

    /// Converts a local failure into the error payload sent back to a caller.
    #[must_use]
    pub fn to_function_error(&self) -> FunctionError {
        match self {
            Self::Function(err) => err.clone(),
            Self::Middleware { name, source } => {
                source.to_function_error().with_details(format!("rejected by {name}"))
            }
            Self::Validation { message } => FunctionError::bad_request(message.clone()),
            Self::Authentication { message } => FunctionError::new(CODE_UNAUTHORIZED, message.clone()),
            Self::NotFound { .. } => FunctionError::new(CODE_NOT_FOUND, self.to_string()),
            Self::RateLimited => FunctionError::new(CODE_TOO_MANY_REQUESTS, self.to_string()),
            Self::CircuitOpen => FunctionError::new(CODE_UNAVAILABLE, self.to_string()),
            other => FunctionError::internal(other.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
