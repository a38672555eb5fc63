//! Wire envelope.
//!
//! Every frame is a JSON text message of the form:
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "type": "call",
//!   "function": "ws://host:port/ws/add/abc",
//!   "params": { "a": 2, "b": 3 },
//!   "metadata": { "timestamp": "2024-01-01T00:00:00Z" }
//! }
//! ```
//!
//! Replies reuse the `id` of the call they answer.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, FunctionError, Result};
use crate::identifiers::MessageId;

// ============================================================================
// MessageType
// ============================================================================

/// Message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Invoke a function.
    Call,
    /// Successful result of a call.
    Response,
    /// Failed result of a call.
    Error,
    /// Announce a function.
    Register,
    /// Liveness probe.
    Ping,
    /// Liveness answer.
    Pong,
}

impl MessageType {
    /// All message types.
    pub const ALL: [Self; 6] = [
        Self::Call,
        Self::Response,
        Self::Error,
        Self::Register,
        Self::Ping,
        Self::Pong,
    ];

    /// Returns `true` for types routed to a pending call by ID.
    #[inline]
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(self, Self::Response | Self::Error | Self::Pong)
    }

    /// Returns the wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Response => "response",
            Self::Error => "error",
            Self::Register => "register",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

// ============================================================================
// ErrorPayload
// ============================================================================

/// Error body of an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Application status code.
    pub code: i32,
    /// Human readable message.
    pub message: String,
    /// Optional extra detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<FunctionError> for ErrorPayload {
    fn from(err: FunctionError) -> Self {
        Self {
            code: err.code,
            message: err.message,
            details: err.details,
        }
    }
}

impl From<ErrorPayload> for FunctionError {
    fn from(payload: ErrorPayload) -> Self {
        Self {
            code: payload.code,
            message: payload.message,
            details: payload.details,
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Message metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Creation time of the message.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Transport headers (authentication, tracing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<FxHashMap<String, String>>,

    /// Free-form caller context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            headers: None,
            context: None,
        }
    }
}

impl Metadata {
    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(String::as_str)
    }
}

// ============================================================================
// Message
// ============================================================================

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation key.
    pub id: MessageId,

    /// Message type.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Target function address (calls and registrations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    /// Call arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,

    /// Call result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Call failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,

    /// Timestamp and headers.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Message {
    /// Creates a message with only an ID and type.
    #[must_use]
    pub fn new(id: MessageId, kind: MessageType) -> Self {
        Self {
            id,
            kind,
            function: None,
            params: None,
            result: None,
            error: None,
            metadata: Metadata::default(),
        }
    }

    /// Creates a `call` message.
    #[must_use]
    pub fn call(id: MessageId, function: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            function: Some(function.into()),
            params: Some(params),
            ..Self::new(id, MessageType::Call)
        }
    }

    /// Creates a `response` message answering `id`.
    #[must_use]
    pub fn response(id: MessageId, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::new(id, MessageType::Response)
        }
    }

    /// Creates an `error` message answering `id`.
    #[must_use]
    pub fn error(id: MessageId, error: impl Into<ErrorPayload>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(id, MessageType::Error)
        }
    }

    /// Creates a `register` message announcing `function`.
    #[must_use]
    pub fn register(id: MessageId, function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            ..Self::new(id, MessageType::Register)
        }
    }

    /// Creates a `ping` message.
    #[inline]
    #[must_use]
    pub fn ping(id: MessageId) -> Self {
        Self::new(id, MessageType::Ping)
    }

    /// Creates a `pong` message answering `id`.
    #[inline]
    #[must_use]
    pub fn pong(id: MessageId) -> Self {
        Self::new(id, MessageType::Pong)
    }

    /// Adds headers to the metadata.
    #[must_use]
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = self.metadata.headers.get_or_insert_with(FxHashMap::default);
        for (name, value) in headers {
            map.insert(name.into(), value.into());
        }
        self
    }

    /// Serializes to a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Message`] if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::message(format!("encode failed: {e}")))
    }

    /// Parses a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Message`] if the frame is not a valid envelope.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::message(format!("decode failed: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
