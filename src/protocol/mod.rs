//! WebSocket protocol message types.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `call` | Caller → Server | Invoke a registered function |
//! | `response` | Server → Caller | Successful result |
//! | `error` | Server → Caller | Failure with status code |
//! | `register` | Either | Announce a function |
//! | `ping` | Either | Liveness probe |
//! | `pong` | Either | Liveness answer |
//!
//! # Correlation
//!
//! The sender allocates the `id`, registers a reply slot keyed by it, then
//! transmits. The receiver routes `response`/`error`/`pong` frames to the
//! slot with the same `id` and drops unmatched ones.

// ============================================================================
// Submodules
// ============================================================================

/// Message envelope and type vocabulary.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{ErrorPayload, Message, MessageType, Metadata};
