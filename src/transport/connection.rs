//! WebSocket connection and event loop.
//!
//! Each connection owns one spawned task that performs all socket I/O:
//!
//! - Inbound frames pass through the middleware pipeline, then replies are
//!   handed to the pending call with the same ID and calls are dispatched to
//!   the local registry
//! - Replies produced here (`response`, `error`, `pong`) pass through the
//!   pipeline before they are written, so stages see both ends of a call
//! - Outbound frames arrive on a command channel and are written in order
//! - An optional keepalive pings the peer and tears the socket down when it
//!   stays silent too long
//!
//! # Correlation
//!
//! A caller registers a one-shot slot under a fresh [`MessageId`] before it
//! sends. The loop removes the slot when the matching reply arrives, so each
//! slot fires at most once. When the loop exits every remaining slot
//! receives [`Error::ConnectionClosed`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::function::Registry;
use crate::identifiers::{ConnectionId, MessageId};
use crate::middleware::Pipeline;
use crate::protocol::{Message, MessageType};

// ============================================================================
// Constants
// ============================================================================

/// Maximum in-flight calls per connection.
pub const MAX_PENDING_CALLS: usize = 1024;

// ============================================================================
// Types
// ============================================================================

/// Map of message IDs to reply slots.
type PendingCalls = FxHashMap<MessageId, oneshot::Sender<Result<Message>>>;

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dialed by this portal.
    Client,
    /// Accepted by this portal's server.
    Server,
}

/// Connection lifecycle.
///
/// `Connecting → Connected → {Closing → Closed | Error → Closed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket open, connect hooks not yet passed.
    Connecting,
    /// Ready for traffic.
    Connected,
    /// Local close requested.
    Closing,
    /// Loop finished.
    Closed,
    /// I/O failure or keepalive expiry; becomes `Closed` once the loop exits.
    Error,
}

/// Keepalive and write limits for the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Interval between WebSocket pings. `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// Silence after which the socket is torn down. `None` never expires.
    pub idle_timeout: Option<Duration>,
    /// Upper bound for a single frame write.
    pub write_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: None,
            idle_timeout: None,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl Keepalive {
    /// Period of the housekeeping tick, if any check is enabled.
    fn tick_period(&self) -> Option<Duration> {
        match (self.ping_interval, self.idle_timeout) {
            (Some(ping), Some(idle)) => Some(ping.min(idle)),
            (ping, idle) => ping.or(idle),
        }
        .filter(|period| !period.is_zero())
    }
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
pub(crate) enum ConnectionCommand {
    /// Write a frame and report the outcome.
    Send {
        message: Message,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

struct Shared {
    id: ConnectionId,
    address: String,
    role: Role,
    state: RwLock<ConnectionState>,
    last_activity: RwLock<Instant>,
    pending: RwLock<PendingCalls>,
    cancel: CancellationToken,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

/// Handle to one WebSocket connection.
///
/// Cheap to clone; clones share the same socket, pending calls and state.
/// The socket lives in the event loop task, never in the handle.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("address", &self.shared.address)
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a handle in the `Connecting` state and the receiving end of
    /// its command channel.
    pub(crate) fn new(
        address: impl Into<String>,
        role: Role,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let connection = Self {
            shared: Arc::new(Shared {
                id: ConnectionId::generate(),
                address: address.into(),
                role,
                state: RwLock::new(ConnectionState::Connecting),
                last_activity: RwLock::new(Instant::now()),
                pending: RwLock::new(PendingCalls::default()),
                cancel: CancellationToken::new(),
                command_tx,
            }),
        };
        (connection, command_rx)
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Returns the canonical endpoint for client connections, or the peer
    /// socket address for accepted ones.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// Returns which side opened the socket.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut current = self.shared.state.write();
        if *current != state {
            trace!(connection_id = %self.shared.id, from = ?*current, to = ?state, "State change");
            *current = state;
        }
    }

    /// Returns `true` while the connection accepts traffic.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) && !self.shared.cancel.is_cancelled()
    }

    /// Returns the time of the last inbound frame.
    #[inline]
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.shared.last_activity.read()
    }

    fn touch(&self) {
        *self.shared.last_activity.write() = Instant::now();
    }

    /// Returns a context cancelled when this connection closes.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::from_token(self.shared.cancel.child_token())
    }

    // ------------------------------------------------------------------------
    // Pending calls
    // ------------------------------------------------------------------------

    /// Claims `id` and returns the slot its reply will be delivered to.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is shutting down
    /// - [`Error::Protocol`] if `id` is already pending or the
    ///   [`MAX_PENDING_CALLS`] limit is reached
    pub fn register_pending(&self, id: MessageId) -> Result<oneshot::Receiver<Result<Message>>> {
        let mut pending = self.shared.pending.write();

        // Checked under the lock: the loop flips state before draining.
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }
        if pending.len() >= MAX_PENDING_CALLS {
            warn!(
                connection_id = %self.shared.id,
                pending = pending.len(),
                max = MAX_PENDING_CALLS,
                "Too many pending calls"
            );
            return Err(Error::protocol(format!(
                "Too many pending calls: {}/{}",
                pending.len(),
                MAX_PENDING_CALLS
            )));
        }
        if pending.contains_key(&id) {
            return Err(Error::protocol(format!("Message ID {id} is already pending")));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    /// Releases `id`. Returns `false` if it was no longer pending.
    pub fn unregister_pending(&self, id: &MessageId) -> bool {
        self.shared.pending.write().remove(id).is_some()
    }

    /// Returns the number of in-flight calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.read().len()
    }

    fn take_pending(&self, id: &MessageId) -> Option<oneshot::Sender<Result<Message>>> {
        self.shared.pending.write().remove(id)
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self.shared.pending.write().drain().collect();
        let count = drained.len();

        for (_, tx) in drained {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(connection_id = %self.shared.id, count, "Failed pending calls on close");
        }
    }

    // ------------------------------------------------------------------------
    // I/O
    // ------------------------------------------------------------------------

    /// Writes a message and waits until it is on the wire.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the loop has stopped
    /// - [`Error::Network`] if the write fails or times out
    pub async fn send(&self, message: &Message) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let (ack, ack_rx) = oneshot::channel();
        self.shared
            .command_tx
            .send(ConnectionCommand::Send {
                message: message.clone(),
                ack,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        ack_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Asks the loop to close the socket. Safe to call more than once.
    pub fn close(&self) {
        if self.is_open() {
            self.set_state(ConnectionState::Closing);
        }
        let _ = self.shared.command_tx.send(ConnectionCommand::Shutdown);
        self.shared.cancel.cancel();
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// Everything the per-connection task needs besides the socket.
pub(crate) struct EventLoop {
    pub connection: Connection,
    pub commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    pub pipeline: Pipeline,
    pub registry: Arc<Registry>,
    pub keepalive: Keepalive,
}

impl EventLoop {
    /// Runs until the socket closes, fails, or the connection is closed.
    ///
    /// On exit the state is `Closed` and every pending call has failed.
    pub(crate) async fn run<S>(mut self, ws_stream: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = self.connection.clone();
        let cancel = conn.shared.cancel.clone();
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let tick_period = self.keepalive.tick_period();
        let mut ticker = interval_at(
            Instant::now() + tick_period.unwrap_or(Duration::from_secs(3600)),
            tick_period.unwrap_or(Duration::from_secs(3600)),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(connection_id = %conn.id(), role = ?conn.role(), "Event loop started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(connection_id = %conn.id(), "Connection cancelled");
                    conn.set_state(ConnectionState::Closing);
                    let _ = timeout(self.keepalive.write_timeout, ws_write.close()).await;
                    break;
                }

                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            conn.touch();
                            if let Some(reply) = self.handle_inbound(text.as_str()) {
                                self.write(&mut ws_write, &reply).await.ok();
                            }
                        }

                        Some(Ok(WsMessage::Close(_))) => {
                            debug!(connection_id = %conn.id(), "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(connection_id = %conn.id(), error = %e, "WebSocket error");
                            conn.set_state(ConnectionState::Error);
                            break;
                        }

                        None => {
                            debug!(connection_id = %conn.id(), "WebSocket stream ended");
                            break;
                        }

                        // Binary, Ping, Pong, raw Frame
                        Some(Ok(_)) => conn.touch(),
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { message, ack }) => {
                            let result = self.write(&mut ws_write, &message).await;
                            let _ = ack.send(result);
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(connection_id = %conn.id(), "Shutdown command received");
                            conn.set_state(ConnectionState::Closing);
                            let _ = timeout(self.keepalive.write_timeout, ws_write.close()).await;
                            break;
                        }

                        None => {
                            debug!(connection_id = %conn.id(), "Command channel closed");
                            break;
                        }
                    }
                }

                _ = ticker.tick(), if tick_period.is_some() => {
                    let idle = conn.last_activity().elapsed();
                    if self.keepalive.idle_timeout.is_some_and(|limit| idle >= limit) {
                        warn!(
                            connection_id = %conn.id(),
                            idle_ms = idle.as_millis() as u64,
                            "Peer silent past keepalive limit"
                        );
                        conn.set_state(ConnectionState::Error);
                        break;
                    }
                    if self.keepalive.ping_interval.is_some() {
                        let ping = ws_write.send(WsMessage::Ping(Default::default()));
                        match timeout(self.keepalive.write_timeout, ping).await {
                            Ok(Ok(())) => trace!(connection_id = %conn.id(), "Keepalive ping sent"),
                            Ok(Err(e)) => warn!(connection_id = %conn.id(), error = %e, "Keepalive ping failed"),
                            Err(_) => warn!(connection_id = %conn.id(), "Keepalive ping timed out"),
                        }
                    }
                }
            }
        }

        // State first, then drain: register_pending checks state under the
        // pending lock, so no slot can be added after the drain.
        conn.set_state(ConnectionState::Closed);
        cancel.cancel();
        conn.fail_pending();

        debug!(connection_id = %conn.id(), "Event loop terminated");
    }

    /// Writes one message under the write timeout.
    async fn write<W>(&self, ws_write: &mut W, message: &Message) -> Result<()>
    where
        W: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let json = message.encode()?;
        let id = self.connection.id();

        let frame = ws_write.send(WsMessage::Text(json.into()));
        match timeout(self.keepalive.write_timeout, frame).await {
            Ok(Ok(())) => {
                trace!(connection_id = %id, message_id = %message.id, kind = %message.kind.as_str(), "Frame sent");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(connection_id = %id, error = %e, "Failed to send frame");
                Err(Error::network(e.to_string()))
            }
            Err(_) => {
                warn!(connection_id = %id, "Frame write timed out");
                Err(Error::network(format!(
                    "write timed out after {}ms",
                    self.keepalive.write_timeout.as_millis()
                )))
            }
        }
    }

    /// Routes one inbound text frame. Returns a frame to write back, if any.
    fn handle_inbound(&self, text: &str) -> Option<Message> {
        let conn = &self.connection;

        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection_id = %conn.id(), error = %e, "Failed to decode inbound frame");
                return None;
            }
        };

        if let Err(e) = self.pipeline.process_message(conn, &message) {
            return self.handle_rejected(message, e);
        }

        match message.kind {
            MessageType::Response | MessageType::Error | MessageType::Pong => {
                match conn.take_pending(&message.id) {
                    Some(tx) => {
                        let _ = tx.send(Ok(message));
                    }
                    None => {
                        warn!(
                            connection_id = %conn.id(),
                            message_id = %message.id,
                            kind = %message.kind.as_str(),
                            "Reply for unknown call"
                        );
                    }
                }
                None
            }

            MessageType::Call => {
                let registry = Arc::clone(&self.registry);
                let pipeline = self.pipeline.clone();
                let reply_conn = conn.clone();
                let ctx = conn.context();
                tokio::spawn(async move {
                    let reply = registry.dispatch(ctx, message).await;
                    let Some(reply) = screen_reply(&pipeline, &reply_conn, reply) else {
                        return;
                    };
                    if let Err(e) = reply_conn.send(&reply).await {
                        debug!(connection_id = %reply_conn.id(), error = %e, "Reply not delivered");
                    }
                });
                None
            }

            MessageType::Ping => screen_reply(&self.pipeline, conn, Message::pong(message.id)),

            MessageType::Register => {
                debug!(
                    connection_id = %conn.id(),
                    function = message.function.as_deref().unwrap_or_default(),
                    "Register announcement received"
                );
                None
            }
        }
    }

    /// Handles a frame the pipeline refused.
    ///
    /// A waiting caller fails immediately and a remote caller gets an
    /// `error` frame, so neither side waits for its timeout.
    fn handle_rejected(&self, message: Message, e: Error) -> Option<Message> {
        let conn = &self.connection;
        warn!(
            connection_id = %conn.id(),
            message_id = %message.id,
            kind = %message.kind.as_str(),
            error = %e,
            "Inbound message rejected by middleware"
        );

        match message.kind {
            MessageType::Call => Some(Message::error(message.id, e.to_function_error())),
            kind if kind.is_reply() => {
                if let Some(tx) = conn.take_pending(&message.id) {
                    let _ = tx.send(Err(e));
                }
                None
            }
            _ => None,
        }
    }
}

/// Runs a locally produced reply through the pipeline before it is written.
///
/// A refused `response` or `error` becomes an `error` frame with the mapped
/// code, which is written without another pass. A refused `pong` is dropped.
fn screen_reply(pipeline: &Pipeline, conn: &Connection, reply: Message) -> Option<Message> {
    let Err(e) = pipeline.process_message(conn, &reply) else {
        return Some(reply);
    };

    warn!(
        connection_id = %conn.id(),
        message_id = %reply.id,
        kind = %reply.kind.as_str(),
        error = %e,
        "Outbound reply rejected by middleware"
    );

    match reply.kind {
        MessageType::Response | MessageType::Error => {
            Some(Message::error(reply.id, e.to_function_error()))
        }
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
