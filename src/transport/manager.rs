//! Connection manager.
//!
//! Keeps at most one client connection per canonical endpoint, so every
//! function registered behind one `scheme://host:port/path` shares a socket.
//! Accepted server-side sockets are tracked separately by connection ID.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionManager               │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ ws://a:80/ws   → Connection (client)   │  │
//! │  │ ws://b:9000/ws → Connection (client)   │  │
//! │  └────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ conn-…         → Connection (server)   │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::function::Registry;
use crate::identifiers::ConnectionId;
use crate::middleware::Pipeline;

use super::connection::{
    Connection, ConnectionCommand, ConnectionState, EventLoop, Keepalive, Role,
};

// ============================================================================
// ConnectionManager
// ============================================================================

struct ManagerShared {
    ws_config: WebSocketConfig,
    handshake_timeout: Duration,
    keepalive: Keepalive,
    pipeline: Pipeline,
    registry: Arc<Registry>,
    /// Client connections by canonical endpoint.
    connections: RwLock<FxHashMap<String, Connection>>,
    /// Accepted connections by ID.
    accepted: RwLock<FxHashMap<ConnectionId, Connection>>,
}

/// Owns every live connection of one portal.
///
/// Cheap to clone; clones share the same maps.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
}

impl ConnectionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(
        ws_config: WebSocketConfig,
        handshake_timeout: Duration,
        keepalive: Keepalive,
        pipeline: Pipeline,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                ws_config,
                handshake_timeout,
                keepalive,
                pipeline,
                registry,
                connections: RwLock::new(FxHashMap::default()),
                accepted: RwLock::new(FxHashMap::default()),
            }),
        }
    }

    /// Returns the number of live client connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.read().len()
    }

    /// Returns the number of live accepted connections.
    #[inline]
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.shared.accepted.read().len()
    }

    /// Returns `true` if an open client connection serves `address`'s endpoint.
    #[must_use]
    pub fn is_connected(&self, address: &Address) -> bool {
        self.shared
            .connections
            .read()
            .get(&address.canonical())
            .is_some_and(Connection::is_open)
    }

    /// Returns the client connection for `address`'s endpoint, if any.
    #[must_use]
    pub fn get(&self, address: &Address) -> Option<Connection> {
        self.shared
            .connections
            .read()
            .get(&address.canonical())
            .filter(|conn| conn.is_open())
            .cloned()
    }
}

// ============================================================================
// ConnectionManager - Client Side
// ============================================================================

impl ConnectionManager {
    /// Returns the open connection for `address`'s endpoint, dialing one if
    /// needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if the dial fails
    /// - [`Error::Timeout`] if the handshake exceeds its bound
    /// - [`Error::Middleware`] if a connect hook rejects the socket
    pub async fn get_or_create(&self, address: &Address) -> Result<Connection> {
        if let Some(existing) = self.get(address) {
            return Ok(existing);
        }

        let canonical = address.canonical();
        debug!(address = %canonical, "Dialing");

        let dial = tokio_tungstenite::connect_async_with_config(
            canonical.as_str(),
            Some(self.shared.ws_config),
            true,
        );
        let (mut ws_stream, _response) = timeout(self.shared.handshake_timeout, dial)
            .await
            .map_err(|_| {
                Error::timeout(
                    format!("connect to {canonical}"),
                    self.shared.handshake_timeout.as_millis() as u64,
                )
            })?
            .map_err(|e| Error::connection(format!("dial {canonical} failed: {e}")))?;

        let (conn, commands) = Connection::new(canonical.clone(), Role::Client);

        // Another task may have won the dial while this one was in flight.
        {
            let mut connections = self.shared.connections.write();
            if let Some(existing) = connections.get(&canonical).filter(|c| c.is_open()) {
                debug!(address = %canonical, "Dial raced, reusing existing connection");
                return Ok(existing.clone());
            }
            connections.insert(canonical.clone(), conn.clone());
        }

        if let Err(e) = self.shared.pipeline.process_connection(&conn) {
            warn!(address = %canonical, error = %e, "Connection rejected by middleware");
            self.remove_client(&conn);
            conn.set_state(ConnectionState::Closed);
            let _ = ws_stream.close(None).await;
            return Err(e);
        }

        conn.set_state(ConnectionState::Connected);
        self.spawn_loop(conn.clone(), commands, ws_stream);

        info!(connection_id = %conn.id(), address = %canonical, "Connected");
        Ok(conn)
    }

    /// Closes the connection for `address`'s endpoint.
    ///
    /// A missing connection is not an error.
    pub fn disconnect(&self, address: &Address) {
        let removed = self.shared.connections.write().remove(&address.canonical());

        match removed {
            Some(conn) => {
                conn.close();
                debug!(connection_id = %conn.id(), address = %conn.address(), "Disconnected");
            }
            None => debug!(address = %address.canonical(), "Disconnect of unknown endpoint"),
        }
    }

    /// Closes every connection, client and accepted.
    ///
    /// The maps are swapped out under their locks; sockets are closed after
    /// the locks are released.
    pub fn close_all(&self) {
        let clients = mem::take(&mut *self.shared.connections.write());
        let accepted = mem::take(&mut *self.shared.accepted.write());
        let count = clients.len() + accepted.len();

        for conn in clients.into_values().chain(accepted.into_values()) {
            conn.close();
        }

        if count > 0 {
            info!(count, "Closed all connections");
        }
    }
}

// ============================================================================
// ConnectionManager - Server Side
// ============================================================================

impl ConnectionManager {
    /// Upgrades an accepted TCP stream and starts its event loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the upgrade exceeds the handshake bound
    /// - [`Error::Connection`] if the upgrade fails
    /// - [`Error::Middleware`] if a connect hook rejects the socket
    pub async fn accept(&self, stream: TcpStream) -> Result<Connection> {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());

        let upgrade = tokio_tungstenite::accept_async_with_config(stream, Some(self.shared.ws_config));
        let mut ws_stream = timeout(self.shared.handshake_timeout, upgrade)
            .await
            .map_err(|_| {
                Error::timeout(
                    format!("upgrade from {peer}"),
                    self.shared.handshake_timeout.as_millis() as u64,
                )
            })?
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let (conn, commands) = Connection::new(peer.clone(), Role::Server);

        if let Err(e) = self.shared.pipeline.process_connection(&conn) {
            warn!(peer = %peer, error = %e, "Inbound connection rejected by middleware");
            conn.set_state(ConnectionState::Closed);
            let _ = ws_stream.close(None).await;
            return Err(e);
        }

        self.shared.accepted.write().insert(conn.id(), conn.clone());
        conn.set_state(ConnectionState::Connected);
        self.spawn_loop(conn.clone(), commands, ws_stream);

        info!(connection_id = %conn.id(), peer = %peer, "Accepted connection");
        Ok(conn)
    }
}

// ============================================================================
// ConnectionManager - Event Loop
// ============================================================================

impl ConnectionManager {
    fn spawn_loop<S>(
        &self,
        connection: Connection,
        commands: mpsc::UnboundedReceiver<ConnectionCommand>,
        ws_stream: WebSocketStream<S>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let event_loop = EventLoop {
            connection: connection.clone(),
            commands,
            pipeline: self.shared.pipeline.clone(),
            registry: Arc::clone(&self.shared.registry),
            keepalive: self.shared.keepalive,
        };
        let manager: Weak<ManagerShared> = Arc::downgrade(&self.shared);
        let pipeline = self.shared.pipeline.clone();

        tokio::spawn(async move {
            event_loop.run(ws_stream).await;

            pipeline.process_disconnection(&connection);
            if let Some(shared) = manager.upgrade() {
                Self { shared }.forget(&connection);
            }
            info!(connection_id = %connection.id(), address = %connection.address(), "Connection closed");
        });
    }

    /// Drops a finished connection from whichever map holds it.
    fn forget(&self, conn: &Connection) {
        match conn.role() {
            Role::Client => self.remove_client(conn),
            Role::Server => {
                self.shared.accepted.write().remove(&conn.id());
            }
        }
    }

    /// Removes `conn` only if it is still the registered connection for its
    /// endpoint; a newer connection may already have replaced it.
    fn remove_client(&self, conn: &Connection) {
        let mut connections = self.shared.connections.write();
        if connections
            .get(conn.address())
            .is_some_and(|current| current.id() == conn.id())
        {
            connections.remove(conn.address());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    use crate::middleware::{Middleware, MetricsMiddleware, RateLimitConfig, RateLimitMiddleware};
    use crate::protocol::Message;

    fn manager(pipeline: Pipeline) -> ConnectionManager {
        ConnectionManager::new(
            WebSocketConfig::default(),
            Duration::from_secs(5),
            Keepalive::default(),
            pipeline,
            Arc::new(Registry::new()),
        )
    }

    /// Binds a listener whose accepted sockets are served by `server`.
    async fn serve(server: ConnectionManager) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = server.accept(stream).await;
            }
        });
        port
    }

    fn address(port: u16, function: &str) -> Address {
        Address::parse(&format!("ws://127.0.0.1:{port}/ws/{function}/abc")).expect("address")
    }

    #[tokio::test]
    async fn test_one_connection_per_endpoint() {
        let port = serve(manager(Pipeline::new())).await;
        let client = manager(Pipeline::new());

        let a = client.get_or_create(&address(port, "add")).await.expect("dial");
        let b = client.get_or_create(&address(port, "sub")).await.expect("reuse");

        assert_eq!(a.id(), b.id());
        assert_eq!(client.connection_count(), 1);
        assert!(client.is_connected(&address(port, "mul")));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let port = serve(manager(Pipeline::new())).await;
        let client = manager(Pipeline::new());
        let target = address(port, "add");

        assert!(!client.is_connected(&target));
        client.disconnect(&target);

        client.get_or_create(&target).await.expect("dial");
        client.disconnect(&target);
        client.disconnect(&target);
        assert!(!client.is_connected(&target));
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let client = manager(Pipeline::new());
        let err = client.get_or_create(&address(port, "add")).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(client.connection_count(), 0);
    }

    struct RefuseAll;

    impl Middleware for RefuseAll {
        fn name(&self) -> &str {
            "refuse_all"
        }

        fn process_message(&self, _conn: &Connection, _msg: &Message) -> Result<()> {
            Ok(())
        }

        fn process_connection(&self, _conn: &Connection) -> Result<()> {
            Err(Error::authentication("not welcome"))
        }
    }

    #[tokio::test]
    async fn test_connect_hook_rejection_aborts() {
        let port = serve(manager(Pipeline::new())).await;
        let pipeline = Pipeline::new();
        pipeline.push(Arc::new(RefuseAll));
        let client = manager(pipeline);

        let err = client.get_or_create(&address(port, "add")).await.unwrap_err();
        assert!(matches!(err, Error::Middleware { ref name, .. } if name == "refuse_all"));
        assert_eq!(client.connection_count(), 0);
    }

    fn refusing_pipeline() -> (Pipeline, Arc<MetricsMiddleware>, Arc<RateLimitMiddleware>) {
        let metrics = Arc::new(MetricsMiddleware::new());
        let limiter = Arc::new(RateLimitMiddleware::new(RateLimitConfig::default()));
        let pipeline = Pipeline::new();
        pipeline.push(metrics.clone());
        pipeline.push(limiter.clone());
        pipeline.push(Arc::new(RefuseAll));
        (pipeline, metrics, limiter)
    }

    #[tokio::test]
    async fn test_refused_dials_leave_no_stage_state() {
        let port = serve(manager(Pipeline::new())).await;
        let (pipeline, metrics, limiter) = refusing_pipeline();
        let client = manager(pipeline);

        for _ in 0..3 {
            assert!(client.get_or_create(&address(port, "add")).await.is_err());
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.disconnections_total, 3);
        assert_eq!(limiter.tracked_connections(), 0);
    }

    #[tokio::test]
    async fn test_refused_accepts_leave_no_stage_state() {
        let (pipeline, metrics, limiter) = refusing_pipeline();
        let port = serve(manager(pipeline)).await;
        let client = manager(Pipeline::new());

        for _ in 0..3 {
            // The server refuses after the handshake and closes the socket.
            let conn = client.get_or_create(&address(port, "add")).await.expect("dial");
            for _ in 0..50 {
                if !conn.is_open() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 3);
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(limiter.tracked_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_all_empties_maps() {
        let port = serve(manager(Pipeline::new())).await;
        let client = manager(Pipeline::new());
        let conn = client.get_or_create(&address(port, "add")).await.expect("dial");

        client.close_all();
        assert_eq!(client.connection_count(), 0);
        assert!(!conn.is_open());
    }
}
