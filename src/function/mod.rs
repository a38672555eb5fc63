//! Function contracts and the local registry.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Schema`] | Input validation contract |
//! | [`FunctionInput`] / [`FunctionOutput`] | Typed argument and result wrappers |
//! | [`Handler`] | Server-side implementation |
//! | [`Registry`] | Functions exposed by a portal, and call dispatch |

// ============================================================================
// Submodules
// ============================================================================

/// Handler trait.
pub mod handler;

/// Input and output wrappers.
pub mod io;

/// Registrations and dispatch.
pub mod registry;

/// Schema trait.
pub mod schema;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::Handler;
pub use io::{FunctionInput, FunctionOutput};
pub use registry::{FunctionRegistration, Registry};
pub use schema::{ObjectSchema, Schema, SchemaMetadata, ValidationIssue, ValidationResult};
