//! Portal: registration and invocation over WebSocket.
//!
//! # Call Flow
//!
//! ```text
//! call_function(ctx, address, input)
//!   ├─ parse address
//!   ├─ get or dial the endpoint's connection
//!   ├─ claim a message ID on that connection
//!   ├─ run outbound middleware, send `call`
//!   └─ wait for: reply │ ctx done │ timeout
//!        (the claimed ID is released on every path)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::address::{self, Address};
use crate::context::Context;
use crate::error::{Error, FunctionError, Result};
use crate::function::{
    FunctionInput, FunctionOutput, FunctionRegistration, Handler, Registry, Schema,
};
use crate::identifiers::MessageId;
use crate::middleware::{CompressionMiddleware, Middleware, Pipeline};
use crate::protocol::{Message, MessageType};
use crate::transport::{Connection, ConnectionManager, Server};

use super::config::PortalConfig;
use super::function::{Endpoint, RemoteFunction};
use super::retry::RetryPolicy;

// ============================================================================
// PendingGuard
// ============================================================================

/// Releases a claimed message ID when dropped.
struct PendingGuard {
    conn: Connection,
    id: MessageId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.conn.unregister_pending(&self.id);
    }
}

// ============================================================================
// Portal
// ============================================================================

struct PortalInner {
    config: PortalConfig,
    pipeline: Pipeline,
    registry: Arc<Registry>,
    manager: ConnectionManager,
    /// Listeners by `host:port`.
    servers: Mutex<FxHashMap<String, Arc<Server>>>,
}

/// Exposes local functions and calls remote ones.
///
/// Cheap to clone; clones share configuration, middleware, registrations
/// and connections. Each portal owns its own state.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use ws_portal::{Context, FunctionInput, FunctionOutput, ObjectSchema, Portal, PortalConfig};
///
/// let portal = Portal::new(PortalConfig::new().with_host("127.0.0.1").with_port(9400))?;
///
/// let address = portal.generate_address("add")?;
/// portal
///     .apply(
///         &address.to_string(),
///         Arc::new(ObjectSchema::new("add").require("a").require("b")),
///         Arc::new(|_ctx: Context, input: FunctionInput| async move {
///             let sum = input.get_f64("a").unwrap_or(0.0) + input.get_f64("b").unwrap_or(0.0);
///             FunctionOutput::from_any(serde_json::json!({ "result": sum }))
///         }),
///     )
///     .await?;
///
/// let add = portal.resolve_function(&address.to_string())?;
/// let output = add.call(&Context::new(), FunctionInput::new().arg("a", 2).arg("b", 3)).await?;
/// ```
#[derive(Clone)]
pub struct Portal {
    inner: Arc<PortalInner>,
}

impl fmt::Debug for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portal")
            .field("config", &self.inner.config)
            .field("middleware", &self.inner.pipeline.names())
            .field("functions", &self.inner.registry.len())
            .field("connections", &self.inner.manager.connection_count())
            .finish()
    }
}

// ============================================================================
// Portal - Constructor
// ============================================================================

impl Portal {
    /// Creates a portal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: PortalConfig) -> Result<Self> {
        config.validate()?;

        let pipeline = Pipeline::new();
        if let Some(settings) = config.compression_config() {
            pipeline.push(Arc::new(CompressionMiddleware::new(settings)));
        }
        let registry = Arc::new(Registry::new());
        let manager = ConnectionManager::new(
            config.websocket_config(),
            config.handshake_timeout,
            config.keepalive(),
            pipeline.clone(),
            Arc::clone(&registry),
        );

        debug!(host = %config.host, port = config.port, scheme = %config.scheme(), "Portal created");

        Ok(Self {
            inner: Arc::new(PortalInner {
                config,
                pipeline,
                registry,
                manager,
                servers: Mutex::new(FxHashMap::default()),
            }),
        })
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.inner.config
    }

    /// Returns the retry policy derived from the configuration.
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.inner.config)
    }

    /// Appends a middleware stage.
    ///
    /// Stages apply to every connection, including ones already open.
    pub fn use_middleware(&self, middleware: impl Middleware + 'static) {
        self.use_shared_middleware(Arc::new(middleware));
    }

    /// Appends a middleware stage the caller keeps a handle to.
    pub fn use_shared_middleware(&self, middleware: Arc<dyn Middleware>) {
        debug!(name = middleware.name(), "Middleware added");
        self.inner.pipeline.push(middleware);
    }

    /// Returns the middleware stage names in order.
    #[must_use]
    pub fn middleware(&self) -> Vec<String> {
        self.inner.pipeline.names()
    }
}

// ============================================================================
// Portal - Addressing
// ============================================================================

impl Portal {
    /// Builds a fresh address for `name` from the configured scheme, host,
    /// port and path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Address`] if `name` is empty or contains `/`.
    pub fn generate_address(&self, name: &str) -> Result<Address> {
        let config = &self.inner.config;
        Address::generate(config.scheme(), &config.host, config.port, &config.path, name)
    }

    /// Checks that `raw` is a well-formed portal address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Address`] describing the problem.
    #[inline]
    pub fn validate_address(&self, raw: &str) -> Result<()> {
        address::validate_address(raw)
    }
}

// ============================================================================
// Portal - Registration
// ============================================================================

impl Portal {
    /// Registers a function and makes sure a listener serves its endpoint.
    ///
    /// The listener binds the address's `host:port`; one listener serves
    /// every function registered at that authority.
    ///
    /// # Errors
    ///
    /// - [`Error::Registration`] if the address is empty, malformed or
    ///   already registered
    /// - [`Error::Connection`] if the listener cannot bind
    pub async fn apply(
        &self,
        address: &str,
        schema: Arc<dyn Schema>,
        handler: Arc<dyn Handler>,
    ) -> Result<Endpoint> {
        if address.trim().is_empty() {
            return Err(Error::registration("address must not be empty"));
        }
        let parsed = Address::parse(address)
            .map_err(|e| Error::registration(format!("invalid address: {e}")))?;

        self.ensure_server(&parsed).await?;

        self.inner.registry.insert(FunctionRegistration {
            address: parsed.clone(),
            schema,
            handler,
            registered_at: Utc::now(),
        })?;

        info!(function = parsed.function(), address = %parsed, "Function registered");
        Ok(Endpoint::new(parsed))
    }

    /// Returns every registration.
    #[must_use]
    pub fn registrations(&self) -> Vec<FunctionRegistration> {
        self.inner.registry.list()
    }

    /// Returns the bound port of the listener for `host:port`, if any.
    #[must_use]
    pub fn listening_port(&self, authority: &str) -> Option<u16> {
        self.inner.servers.lock().get(authority).map(|server| server.port())
    }

    async fn ensure_server(&self, address: &Address) -> Result<()> {
        let authority = address.authority();
        if self.inner.servers.lock().contains_key(&authority) {
            return Ok(());
        }

        let server = Server::bind(&authority, self.inner.manager.clone()).await?;

        let mut servers = self.inner.servers.lock();
        if servers.contains_key(&authority) {
            // Lost a concurrent bind race; the port is already served.
            server.shutdown();
        } else {
            servers.insert(authority, Arc::new(server));
        }
        Ok(())
    }
}

// ============================================================================
// Portal - Invocation
// ============================================================================

impl Portal {
    /// Returns a callable handle for `address`.
    ///
    /// Performs no network I/O. The handle carries the schema when the
    /// function is registered on this portal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Address`] if the address is malformed or its scheme
    /// is not `ws`/`wss`.
    pub fn resolve_function(&self, address: &str) -> Result<RemoteFunction> {
        let parsed = Address::parse(address)?;
        let schema = self
            .inner
            .registry
            .lookup(address)
            .map(|registration| registration.schema);
        Ok(RemoteFunction::new(self.clone(), parsed, schema))
    }

    /// Calls the function at `address` once, with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Address`] if the address is malformed
    /// - [`Error::Connection`] / [`Error::Network`] on transport failure
    /// - [`Error::Timeout`] if `ctx` is already done, finishes first, or the
    ///   timeout elapses
    /// - [`Error::Function`] carrying the remote code on a remote failure
    /// - [`Error::Middleware`] if a stage rejects the call or its reply
    pub async fn call_function(
        &self,
        ctx: &Context,
        address: &str,
        input: FunctionInput,
    ) -> Result<FunctionOutput> {
        let parsed = Address::parse(address)?;
        self.call_address(ctx, &parsed, input, self.inner.config.default_timeout)
            .await
    }

    /// Calls the function at `address`, retrying per the configured policy.
    ///
    /// # Errors
    ///
    /// The first terminal error, or the last error once retries run out.
    pub async fn call_with_retry(
        &self,
        ctx: &Context,
        address: &str,
        input: FunctionInput,
    ) -> Result<FunctionOutput> {
        let parsed = Address::parse(address)?;
        let timeout = self.inner.config.default_timeout;
        self.retry_policy()
            .run(ctx, |_| self.call_address(ctx, &parsed, input.clone(), timeout))
            .await
    }

    pub(crate) async fn call_address(
        &self,
        ctx: &Context,
        address: &Address,
        input: FunctionInput,
        timeout: Duration,
    ) -> Result<FunctionOutput> {
        let operation = format!("call {}", address.function());
        if ctx.is_done() {
            return Err(Error::cancelled(operation));
        }

        let conn = self.connection_for(ctx, address, &operation).await?;
        let id = MessageId::generate();
        let mut call = Message::call(id.clone(), address.to_string(), input.into_map());
        if !self.inner.config.headers.is_empty() {
            call = call.with_headers(self.inner.config.headers.clone());
        }

        let reply = self.exchange(ctx, &conn, call, timeout, &operation).await?;

        match reply.kind {
            MessageType::Response => Ok(FunctionOutput::from_value(
                reply.result.unwrap_or(Value::Null),
            )),
            MessageType::Error => Err(Error::Function(reply.error.map_or_else(
                || FunctionError::internal("error reply without payload"),
                FunctionError::from,
            ))),
            other => Err(Error::protocol(format!(
                "unexpected {} reply to call {id}",
                other.as_str()
            ))),
        }
    }

    /// Sends a ping to `address`'s endpoint and returns the round trip time.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the reply is not a `pong`
    /// - [`Error::Timeout`] if `ctx` or the default timeout finishes first
    /// - transport errors as for [`Portal::call_function`]
    pub async fn ping(&self, ctx: &Context, address: &str) -> Result<Duration> {
        let parsed = Address::parse(address)?;
        let operation = format!("ping {}", parsed.canonical());
        if ctx.is_done() {
            return Err(Error::cancelled(operation));
        }

        let conn = self.connection_for(ctx, &parsed, &operation).await?;
        let started = Instant::now();
        let reply = self
            .exchange(
                ctx,
                &conn,
                Message::ping(MessageId::generate()),
                self.inner.config.default_timeout,
                &operation,
            )
            .await?;

        if reply.kind != MessageType::Pong {
            return Err(Error::protocol(format!(
                "expected pong, got {}",
                reply.kind.as_str()
            )));
        }
        Ok(started.elapsed())
    }

    /// Announces a function registered on this portal to the endpoint
    /// serving `peer`.
    ///
    /// Sends one `register` frame and waits for no reply. The remote portal
    /// only records the announcement in its logs.
    ///
    /// # Errors
    ///
    /// - [`Error::Address`] if `peer` is malformed
    /// - [`Error::NotFound`] if `endpoint` is not registered here
    /// - [`Error::Middleware`] if a stage rejects the frame
    /// - transport errors as for [`Portal::call_function`]
    pub async fn announce(&self, ctx: &Context, peer: &str, endpoint: &Endpoint) -> Result<()> {
        let parsed = Address::parse(peer)?;
        let function = endpoint.address().to_string();
        if self.inner.registry.lookup(&function).is_none() {
            return Err(Error::not_found(function));
        }

        let operation = format!("announce to {}", parsed.canonical());
        if ctx.is_done() {
            return Err(Error::cancelled(operation));
        }

        let conn = self.connection_for(ctx, &parsed, &operation).await?;
        let mut message = Message::register(MessageId::generate(), function);
        if !self.inner.config.headers.is_empty() {
            message = message.with_headers(self.inner.config.headers.clone());
        }

        self.inner.pipeline.process_message(&conn, &message)?;
        conn.send(&message).await?;

        debug!(connection_id = %conn.id(), function = endpoint.name(), "Function announced");
        Ok(())
    }

    /// Dials `ctx`-bounded, returning the endpoint's shared connection.
    async fn connection_for(
        &self,
        ctx: &Context,
        address: &Address,
        operation: &str,
    ) -> Result<Connection> {
        tokio::select! {
            conn = self.inner.manager.get_or_create(address) => conn,
            () = ctx.done() => Err(Error::cancelled(operation)),
        }
    }

    /// Claims `message.id`, sends it, and waits for the correlated reply.
    async fn exchange(
        &self,
        ctx: &Context,
        conn: &Connection,
        message: Message,
        timeout: Duration,
        operation: &str,
    ) -> Result<Message> {
        let rx: oneshot::Receiver<Result<Message>> = conn.register_pending(message.id.clone())?;
        let _guard = PendingGuard {
            conn: conn.clone(),
            id: message.id.clone(),
        };

        self.inner.pipeline.process_message(conn, &message)?;
        conn.send(&message).await?;

        tokio::select! {
            reply = rx => match reply {
                Ok(result) => result,
                Err(_) => Err(Error::ConnectionClosed),
            },
            () = ctx.done() => {
                debug!(message_id = %message.id, "Call abandoned by caller");
                Err(Error::cancelled(operation))
            }
            () = sleep(timeout) => {
                warn!(message_id = %message.id, timeout_ms = timeout.as_millis() as u64, "Call timed out");
                Err(Error::timeout(operation, timeout.as_millis() as u64))
            }
        }
    }
}

// ============================================================================
// Portal - Lifecycle
// ============================================================================

impl Portal {
    /// Opens the connection for `address`'s endpoint ahead of the first call.
    ///
    /// # Errors
    ///
    /// - [`Error::Address`] if the address is malformed
    /// - transport errors as for [`Portal::call_function`]
    pub async fn connect(&self, address: &str) -> Result<()> {
        let parsed = Address::parse(address)?;
        self.inner.manager.get_or_create(&parsed).await.map(|_| ())
    }

    /// Returns `true` if an open connection serves `address`'s endpoint.
    ///
    /// Malformed addresses are never connected.
    #[must_use]
    pub fn is_connected(&self, address: &str) -> bool {
        Address::parse(address).is_ok_and(|parsed| self.inner.manager.is_connected(&parsed))
    }

    /// Closes the connection for `address`'s endpoint.
    ///
    /// Succeeds when no such connection exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Address`] if the address is malformed.
    pub fn disconnect_from(&self, address: &str) -> Result<()> {
        let parsed = Address::parse(address)?;
        self.inner.manager.disconnect(&parsed);
        Ok(())
    }

    /// Closes every connection. Registrations and listeners stay.
    pub fn close_all_connections(&self) {
        self.inner.manager.close_all();
    }

    /// Stops every listener, closes every connection and drops every
    /// registration.
    pub fn close(&self) {
        let servers: Vec<_> = self.inner.servers.lock().drain().collect();
        for (authority, server) in servers {
            server.shutdown();
            debug!(address = %authority, "Listener stopped");
        }

        self.inner.manager.close_all();
        self.inner.registry.clear();

        info!("Portal closed");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use crate::address::Scheme;
    use crate::function::ObjectSchema;
    use crate::portal::TlsConfig;

    fn echo() -> Arc<dyn Handler> {
        Arc::new(|_ctx: Context, input: FunctionInput| async move {
            Ok::<_, Error>(FunctionOutput::from_value(Value::Object(input.into_map())))
        })
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr").port()
    }

    fn portal(port: u16) -> Portal {
        Portal::new(PortalConfig::new().with_host("127.0.0.1").with_port(port)).expect("portal")
    }

    #[test]
    fn test_generate_address_follows_tls() {
        let plain = Portal::new(PortalConfig::default()).expect("portal");
        let address = plain.generate_address("add").expect("address");
        assert_eq!(address.scheme(), Scheme::Ws);
        assert_eq!(address.port(), 80);
        assert_eq!(address.path(), "ws");
        assert!(plain.validate_address(&address.to_string()).is_ok());

        let secure = Portal::new(PortalConfig::new().with_tls(TlsConfig)).expect("portal");
        let address = secure.generate_address("add").expect("address");
        assert_eq!(address.scheme(), Scheme::Wss);
        assert_eq!(address.port(), 443);
    }

    /// Serves one socket that answers every frame with `answer`.
    async fn scripted_peer(answer: fn(Message) -> Message) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            while let Some(Ok(frame)) = ws.next().await {
                if let WsMessage::Text(text) = frame {
                    let request = Message::decode(text.as_str()).expect("decode");
                    let reply = answer(request).encode().expect("encode");
                    if ws.send(WsMessage::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
        });
        port
    }

    #[tokio::test]
    async fn test_ping_answered_with_response_is_protocol_error() {
        let port = scripted_peer(|request| Message::response(request.id, json!("not a pong"))).await;
        let client = Portal::new(PortalConfig::default()).expect("portal");

        let err = client
            .ping(&Context::new(), &format!("ws://127.0.0.1:{port}/ws/echo/abc"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Protocol { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_call_answered_with_pong_is_protocol_error() {
        let port = scripted_peer(|request| Message::pong(request.id)).await;
        let client = Portal::new(PortalConfig::default()).expect("portal");

        let err = client
            .call_function(
                &Context::new(),
                &format!("ws://127.0.0.1:{port}/ws/echo/abc"),
                FunctionInput::new().arg("x", 1),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_compression_flag_installs_stage() {
        let plain = Portal::new(PortalConfig::default()).expect("portal");
        assert!(plain.middleware().is_empty());

        let compressed = Portal::new(PortalConfig::new().with_compression(true)).expect("portal");
        assert_eq!(compressed.middleware(), ["compression"]);
    }

    /// Records the kind of every message it sees.
    #[derive(Default)]
    struct SeenKinds(Mutex<Vec<MessageType>>);

    impl Middleware for SeenKinds {
        fn name(&self) -> &str {
            "seen_kinds"
        }

        fn process_message(&self, _conn: &Connection, msg: &Message) -> Result<()> {
            self.0.lock().push(msg.kind);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_announce_sends_register_frame() {
        let server = portal(free_port());
        let seen = Arc::new(SeenKinds::default());
        server.use_shared_middleware(seen.clone());
        let target = server.generate_address("echo").expect("address").to_string();
        server
            .apply(&target, Arc::new(ObjectSchema::new("echo")), echo())
            .await
            .expect("apply");

        let client = portal(free_port());
        let local = client.generate_address("local").expect("address").to_string();
        let endpoint = client
            .apply(&local, Arc::new(ObjectSchema::new("local")), echo())
            .await
            .expect("apply");

        client
            .announce(&Context::new(), &target, &endpoint)
            .await
            .expect("announce");

        for _ in 0..100 {
            if seen.0.lock().contains(&MessageType::Register) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.0.lock(), [MessageType::Register]);

        client.close();
        server.close();
    }

    #[tokio::test]
    async fn test_announce_requires_local_registration() {
        let client = Portal::new(PortalConfig::default()).expect("portal");
        let stranger = Endpoint::new(
            Address::parse("ws://127.0.0.1:9/ws/ghost/abc").expect("address"),
        );

        let err = client
            .announce(&Context::new(), "ws://127.0.0.1:9/ws/echo/abc", &stranger)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(client.inner.manager.connection_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Portal::new(PortalConfig::new().with_host("")),
            Err(Error::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_rejects_empty_and_malformed() {
        let portal = portal(free_port());
        let schema: Arc<dyn Schema> = Arc::new(ObjectSchema::new("echo"));

        let err = portal.apply("", Arc::clone(&schema), echo()).await.unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));

        let err = portal
            .apply("http://h/ws/echo/1", schema, echo())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
        assert!(portal.registrations().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_cannot_be_called() {
        let port = free_port();
        let portal = portal(port);
        let address = portal.generate_address("echo").expect("address");

        let endpoint = portal
            .apply(&address.to_string(), Arc::new(ObjectSchema::new("echo")), echo())
            .await
            .expect("apply");

        assert_eq!(endpoint.name(), "echo");
        assert_eq!(portal.listening_port(&address.authority()), Some(port));
        assert!(matches!(
            endpoint.call(&Context::new(), FunctionInput::new()).await,
            Err(Error::Registration { .. })
        ));
        portal.close();
    }

    #[tokio::test]
    async fn test_resolve_carries_local_schema() {
        let portal = portal(free_port());
        let address = portal.generate_address("echo").expect("address").to_string();
        portal
            .apply(&address, Arc::new(ObjectSchema::new("echo")), echo())
            .await
            .expect("apply");

        let local = portal.resolve_function(&address).expect("resolve");
        assert_eq!(local.schema().map(|s| s.metadata().name), Some("echo".to_string()));

        let remote = portal
            .resolve_function("ws://elsewhere:9000/ws/echo/xyz")
            .expect("resolve");
        assert!(remote.schema().is_none());
        assert!(!portal.is_connected("ws://elsewhere:9000/ws/echo/xyz"));

        assert!(matches!(
            portal.resolve_function("ftp://h/ws/echo/1"),
            Err(Error::Address { .. })
        ));
        portal.close();
    }

    #[tokio::test]
    async fn test_cancelled_context_does_not_dial() {
        let portal = portal(free_port());
        let ctx = Context::new();
        ctx.cancel();

        let err = portal
            .call_function(&ctx, "ws://127.0.0.1:1/ws/echo/abc", FunctionInput::new())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(portal.inner.manager.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_and_pending_released() {
        let portal = portal(free_port());
        let address = portal.generate_address("echo").expect("address").to_string();
        portal
            .apply(&address, Arc::new(ObjectSchema::new("echo")), echo())
            .await
            .expect("apply");

        let output = portal
            .call_function(&Context::new(), &address, FunctionInput::new().arg("x", 1))
            .await
            .expect("call");
        assert_eq!(output.value(), &json!({ "x": 1 }));

        let parsed = Address::parse(&address).expect("address");
        let conn = portal.inner.manager.get(&parsed).expect("connection");
        assert_eq!(conn.pending_count(), 0);
        portal.close();
    }
}
