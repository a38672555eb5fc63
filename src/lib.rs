//! WebSocket Portal - bidirectional RPC over persistent WebSocket connections.
//!
//! One side registers named functions at generated addresses, the other
//! resolves those addresses into callable handles and invokes them. Calls
//! are correlated by message ID, bounded by timeouts, retried on transient
//! failures, and pass through a middleware pipeline for auth, logging,
//! metrics, rate limiting and circuit breaking.
//!
//! # Architecture
//!
//! - Every endpoint (`scheme://host:port/path`) is served by one socket,
//!   shared by all functions registered behind it
//! - Each socket is owned by one event loop task; callers talk to it through
//!   a channel and wait on a private one-shot reply slot
//! - Each [`Portal`] owns its registrations and connections; there is no
//!   global state
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use ws_portal::{
//!     Context, FunctionInput, FunctionOutput, ObjectSchema, Portal, PortalConfig, Result,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Portal::new(PortalConfig::new().with_host("127.0.0.1").with_port(9400))?;
//!     let address = server.generate_address("add")?.to_string();
//!
//!     server
//!         .apply(
//!             &address,
//!             Arc::new(ObjectSchema::new("add").require("a").require("b")),
//!             Arc::new(|_ctx: Context, input: FunctionInput| async move {
//!                 let a = input.get_f64("a").unwrap_or_default();
//!                 let b = input.get_f64("b").unwrap_or_default();
//!                 FunctionOutput::from_any(json!({ "result": a + b }))
//!             }),
//!         )
//!         .await?;
//!
//!     let client = Portal::new(PortalConfig::default())?;
//!     let add = client.resolve_function(&address)?;
//!     let output = add
//!         .call(&Context::new(), FunctionInput::new().arg("a", 2).arg("b", 3))
//!         .await?;
//!     println!("{}", output.value());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`address`] | Address parsing, validation and generation |
//! | [`context`] | Call cancellation and deadlines |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`function`] | Schema, input/output and handler contracts |
//! | [`identifiers`] | Message and connection IDs |
//! | [`middleware`] | Interceptor pipeline and stock stages |
//! | [`portal`] | [`Portal`], configuration and retry |
//! | [`protocol`] | Wire envelope |
//! | [`transport`] | Connections, event loops and listener |

// ============================================================================
// Modules
// ============================================================================

/// Address parsing, validation and generation.
pub mod address;

/// Call cancellation and deadlines.
pub mod context;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Schema, input/output and handler contracts, plus the local registry.
pub mod function;

/// Message and connection identifiers.
pub mod identifiers;

/// Middleware pipeline.
pub mod middleware;

/// Portal orchestration.
pub mod portal;

/// WebSocket wire envelope.
pub mod protocol;

/// WebSocket transport layer.
///
/// Connections, per-connection event loops and the accept loop.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Addressing
pub use address::{Address, Scheme, validate_address};

// Context
pub use context::Context;

// Error types
pub use error::{Error, ErrorKind, FunctionError, Result};

// Function contracts
pub use function::{
    FunctionInput, FunctionOutput, FunctionRegistration, Handler, ObjectSchema, Schema,
    SchemaMetadata, ValidationIssue, ValidationResult,
};

// Identifier types
pub use identifiers::{ConnectionId, MessageId};

// Middleware
pub use middleware::{Middleware, Pipeline};

// Portal
pub use portal::{Endpoint, Portal, PortalConfig, RemoteFunction, RetryPolicy, TlsConfig};

// Protocol
pub use protocol::{Message, MessageType};

// Transport
pub use transport::{Connection, ConnectionState, Role};
