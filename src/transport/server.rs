//! Listening side of a portal.
//!
//! # Connection Flow
//!
//! 1. [`Server::bind`] binds a TCP listener to the endpoint's `host:port`
//! 2. The accept loop hands each socket to the [`ConnectionManager`]
//! 3. The manager upgrades it, runs connect hooks and starts its event loop
//! 4. Inbound `call` messages are dispatched to the portal's registry

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::ConnectionManager;

// ============================================================================
// Server
// ============================================================================

/// A bound listener with a running accept loop.
///
/// Dropping the handle does not stop the loop; call [`Server::shutdown`].
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Server {
    /// Binds `authority` (`host:port`) and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the address cannot be bound.
    pub async fn bind(authority: &str, manager: ConnectionManager) -> Result<Self> {
        let listener = TcpListener::bind(authority)
            .await
            .map_err(|e| Error::connection(format!("bind {authority} failed: {e}")))?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();

        info!(address = %local_addr, "Portal server listening");

        tokio::spawn(Self::accept_loop(listener, manager, cancel.clone()));

        Ok(Self { local_addr, cancel })
    }

    /// Returns the bound socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stops accepting. Established connections are left to the manager.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once [`Server::shutdown`] has been called.
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn accept_loop(listener: TcpListener, manager: ConnectionManager, cancel: CancellationToken) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Accept loop shutting down");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!(peer = %addr, "New TCP connection");
                            let manager = manager.clone();
                            tokio::spawn(async move {
                                if let Err(e) = manager.accept(stream).await {
                                    warn!(peer = %addr, error = %e, "Connection handling failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    }
                }
            }
        }

        debug!("Accept loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================
