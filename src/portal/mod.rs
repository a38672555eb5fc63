//! Portal: the public face of the crate.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `config` | [`PortalConfig`] and [`TlsConfig`] |
//! | `core` | [`Portal`] registration, invocation and lifecycle |
//! | `function` | [`Endpoint`] and [`RemoteFunction`] handles |
//! | `retry` | [`RetryPolicy`] |

// ============================================================================
// Submodules
// ============================================================================

/// Portal configuration.
pub mod config;

/// Portal implementation.
pub mod core;

/// Function handles.
pub mod function;

/// Retry layer.
pub mod retry;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{PortalConfig, TlsConfig};
pub use core::Portal;
pub use function::{Endpoint, RemoteFunction};
pub use retry::RetryPolicy;
