//! WebSocket transport layer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                           ┌──────────────────┐
//! │  Portal (caller) │                           │  Portal (callee) │
//! │                  │         WebSocket         │                  │
//! │  Connection      │◄─────────────────────────►│  Server          │
//! │  Manager         │   ws://host:port/path     │  → Connection    │
//! │                  │                           │  → Registry      │
//! └──────────────────┘                           └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionManager::get_or_create` dials the canonical endpoint once
//! 2. Connect hooks run; a failure closes the socket
//! 3. The event loop task owns the socket until close or failure
//! 4. Disconnect hooks run and the connection leaves the manager
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection handle, pending calls and event loop |
//! | `manager` | Canonical endpoint map |
//! | `server` | Listener and accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// Connection handle and event loop.
pub mod connection;

/// Canonical endpoint map.
pub mod manager;

/// Listener and accept loop.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionState, Keepalive, MAX_PENDING_CALLS, Role};
pub use manager::ConnectionManager;
pub use server::Server;
