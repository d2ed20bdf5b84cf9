//! A single graphql-ws connection.
//!
//! Each connection runs two loops:
//! - the **inbound loop** reads one frame at a time, enforces the read limit
//!   and dispatches by message type;
//! - the **outbound loop** is the only writer of the socket. It drains the
//!   mailbox and applies a write deadline to every frame.
//!
//! Anything that wants to talk to the client (hooks, result forwarders,
//! keep-alive) enqueues on the mailbox through [`Connection`]. The mailbox is
//! bounded, so a slow client pushes back on its producers until the write
//! deadline drops it.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use gqlws_protocol::{
    DEFAULT_READ_LIMIT, DEFAULT_WRITE_TIMEOUT, DataPayload, GraphQLError, InitPayload, MessageType,
    OperationMessage, ProtocolError, StartPayload,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{Authenticator, AuthenticatorDyn};
use crate::context::ConnectionContext;
use crate::hooks::{EventHandlers, EventHandlersDyn, NoHandlers};

/// Default number of outbound messages buffered per connection.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for a successful `connection_init`.
    Unauthenticated,
    /// Handshake done; the context has been set.
    Active,
    /// `close()` ran; loops are winding down.
    Closing,
    /// Both loops exited and the close hook ran.
    Closed,
}

/// Per-connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Maximum size of an incoming frame in bytes. Larger frames are fatal.
    pub read_limit: usize,
    /// Deadline for each outbound write. Exceeding it tears the connection down.
    pub write_timeout: Duration,
    /// Capacity of the outbound mailbox.
    pub mailbox_capacity: usize,
    /// Interval of `ka` messages after the first ack. `None` disables them.
    pub keep_alive: Option<Duration>,
    authenticator: Option<Arc<dyn AuthenticatorDyn>>,
    handlers: Arc<dyn EventHandlersDyn>,
}

impl ConnectionConfig {
    pub fn new<H: EventHandlers>(handlers: Arc<H>) -> Self {
        Self {
            read_limit: DEFAULT_READ_LIMIT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            keep_alive: None,
            authenticator: None,
            handlers,
        }
    }

    pub fn with_authenticator<A: Authenticator>(mut self, authenticator: A) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn with_read_limit(mut self, read_limit: usize) -> Self {
        self.read_limit = read_limit;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval.filter(|i| !i.is_zero());
        self
    }

    pub fn has_authenticator(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Operations currently running, as reported by the hooks.
    pub fn operation_count(&self) -> usize {
        self.handlers.operation_count_dyn()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(Arc::new(NoHandlers))
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("read_limit", &self.read_limit)
            .field("write_timeout", &self.write_timeout)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("keep_alive", &self.keep_alive)
            .field("authenticator", &self.authenticator.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to a running connection. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    config: ConnectionConfig,
    /// Written only by the inbound loop, once, on successful authentication.
    context: RwLock<ConnectionContext>,
    lifecycle: Mutex<Lifecycle>,
    /// Cancelled by `close()`; stops the inbound loop and keep-alive task.
    shutdown: CancellationToken,
}

struct Lifecycle {
    state: ConnectionState,
    /// Dropped on close so the outbound loop drains and exits.
    mailbox: Option<mpsc::Sender<OperationMessage>>,
    /// Set when the first `connection_ack` goes out.
    acked: bool,
}

impl Connection {
    /// Start serving a connection over a split socket.
    ///
    /// The returned task finishes once both loops have exited; the
    /// connection is then [`ConnectionState::Closed`].
    pub fn spawn<S, R, E>(sink: S, stream: R, config: ConnectionConfig) -> (Self, JoinHandle<()>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: fmt::Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send,
    {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let conn = Self {
            inner: Arc::new(Inner {
                id: uuid::Uuid::new_v4().to_string(),
                config,
                context: RwLock::new(ConnectionContext::background()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Unauthenticated,
                    mailbox: Some(mailbox_tx),
                    acked: false,
                }),
                shutdown: CancellationToken::new(),
            }),
        };
        info!(conn = %conn.id(), "connection created");

        let writer = tokio::spawn(write_loop(conn.clone(), sink, mailbox_rx));
        let reader = conn.clone();
        let handle = tokio::spawn(async move {
            read_loop(reader.clone(), stream).await;
            if let Err(e) = writer.await {
                error!(conn = %reader.id(), "write loop failed: {e}");
            }
            reader.finish();
        });

        (conn, handle)
    }

    /// Process-unique connection id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The current context: background until authentication succeeds.
    pub fn context(&self) -> ConnectionContext {
        self.inner.context.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    /// True once `close()` has run.
    pub fn is_closed(&self) -> bool {
        matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed)
    }

    /// Resolves once the connection starts closing.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Send a result of operation `operation_id`.
    ///
    /// Waits while the mailbox is full. Returns `false` if the connection is
    /// closed and the message was dropped.
    pub async fn send_data(&self, operation_id: &str, payload: &DataPayload) -> bool {
        self.enqueue(OperationMessage::data(operation_id, payload)).await
    }

    /// Send a connection-scoped error.
    pub async fn send_error(&self, error: GraphQLError) -> bool {
        self.enqueue(OperationMessage::error(None, &[error])).await
    }

    /// Send errors scoped to operation `operation_id`.
    pub async fn send_operation_errors(&self, operation_id: &str, errors: &[GraphQLError]) -> bool {
        self.enqueue(OperationMessage::error(Some(operation_id.to_string()), errors))
            .await
    }

    /// Tell the client operation `operation_id` will produce no more data.
    pub async fn send_complete(&self, operation_id: &str) -> bool {
        self.enqueue(OperationMessage::complete(operation_id)).await
    }

    /// Close the connection. Idempotent.
    ///
    /// Closes the mailbox (the outbound loop flushes what is queued, then
    /// closes the socket), stops the inbound loop and runs the close hook.
    pub fn close(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if matches!(lifecycle.state, ConnectionState::Closing | ConnectionState::Closed) {
                return;
            }
            lifecycle.state = ConnectionState::Closing;
            lifecycle.mailbox = None;
        }
        self.inner.shutdown.cancel();
        self.inner.config.handlers.close_dyn(self);
        debug!(conn = %self.id(), "connection closing");
    }

    // ── Internal ──────────────────────────────────────────────────────────

    async fn enqueue(&self, msg: OperationMessage) -> bool {
        // Clone the sender so the lock is never held across the send.
        let mailbox = self.inner.lifecycle.lock().mailbox.clone();
        let Some(mailbox) = mailbox else {
            debug!(conn = %self.id(), "dropping {} message on closed connection", msg.kind);
            return false;
        };
        mailbox.send(msg).await.is_ok()
    }

    fn finish(&self) {
        self.inner.lifecycle.lock().state = ConnectionState::Closed;
        info!(conn = %self.id(), "connection closed");
    }

    /// `Unauthenticated` → `Active`. Returns false if the state was anything else.
    fn activate(&self, context: Option<ConnectionContext>) -> bool {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != ConnectionState::Unauthenticated {
            return false;
        }
        if let Some(context) = context {
            *self.inner.context.write() = context;
        }
        lifecycle.state = ConnectionState::Active;
        true
    }

    async fn dispatch(&self, msg: OperationMessage) -> ControlFlow<()> {
        let kind = msg.kind.clone();
        match kind {
            MessageType::ConnectionInit => self.handle_init(&msg, true).await,
            MessageType::ConnectionAuth => self.handle_init(&msg, false).await,
            MessageType::Start => self.handle_start(msg).await,
            MessageType::Stop => {
                debug!(conn = %self.id(), op = %msg.id(), "stop operation");
                self.inner.config.handlers.stop_operation_dyn(self, msg.id());
            }
            MessageType::ConnectionTerminate => {
                debug!(conn = %self.id(), "connection terminated by client");
                self.close();
                return ControlFlow::Break(());
            }
            MessageType::Unknown(_) => {
                error!(conn = %self.id(), "unhandled message: {msg}");
            }
            inert => {
                debug!(conn = %self.id(), "ignoring {inert} message");
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_init(&self, msg: &OperationMessage, ack: bool) {
        let payload = match InitPayload::from_message(msg.kind.clone(), msg.payload.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(conn = %self.id(), "{e}");
                self.send_error(e.into()).await;
                return;
            }
        };

        if self.state() == ConnectionState::Active {
            debug!(conn = %self.id(), "already authenticated, {} ignored", msg.kind);
            if ack {
                self.acknowledge().await;
            }
            return;
        }

        let context = match &self.inner.config.authenticator {
            None => None,
            Some(authenticator) => match authenticator.authenticate_dyn(payload, self).await {
                Ok(context) => Some(context),
                Err(e) => {
                    warn!(conn = %self.id(), "authentication failed: {e}");
                    self.enqueue(OperationMessage::connection_error(format!(
                        "Failed to authenticate user: {e}"
                    )))
                    .await;
                    return;
                }
            },
        };

        if !self.activate(context) {
            return;
        }
        debug!(conn = %self.id(), "connection authenticated");

        if ack {
            self.acknowledge().await;
        }
    }

    /// Send `connection_ack`. The first one also starts keep-alive, whether
    /// the connection was activated by `connection_init` or `connection_auth`.
    async fn acknowledge(&self) {
        if !self.enqueue(OperationMessage::connection_ack()).await {
            return;
        }
        let first = !std::mem::replace(&mut self.inner.lifecycle.lock().acked, true);
        if !first {
            return;
        }
        if let Some(interval) = self.inner.config.keep_alive {
            self.spawn_keep_alive(interval);
        }
    }

    async fn handle_start(&self, msg: OperationMessage) {
        let Some(id) = msg.id.filter(|id| !id.is_empty()) else {
            let err = ProtocolError::MissingId(MessageType::Start);
            warn!(conn = %self.id(), "{err}");
            self.send_error(err.into()).await;
            return;
        };

        let payload = match StartPayload::from_message(msg.payload.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(conn = %self.id(), op = %id, "{e}");
                self.send_operation_errors(&id, &[e.into()]).await;
                return;
            }
        };

        debug!(conn = %self.id(), op = %id, "start operation");
        let errors = self
            .inner
            .config
            .handlers
            .start_operation_dyn(self, &id, payload)
            .await;
        if !errors.is_empty() {
            self.send_operation_errors(&id, &errors).await;
        }
    }

    fn spawn_keep_alive(&self, interval: Duration) {
        let conn = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = conn.inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if !conn.enqueue(OperationMessage::keep_alive()).await {
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loops
// ─────────────────────────────────────────────────────────────────────────────

async fn read_loop<R, E>(conn: Connection, mut stream: R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display + Send,
{
    let limit = conn.inner.config.read_limit;

    loop {
        let frame = tokio::select! {
            _ = conn.inner.shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };

        let decoded = match frame {
            Some(Ok(Message::Text(text))) => decode_frame(text.as_str().as_bytes(), limit),
            Some(Ok(Message::Binary(bytes))) => decode_frame(&bytes, limit),
            Some(Ok(Message::Close(_))) | None => {
                debug!(conn = %conn.id(), "peer closed the socket");
                conn.close();
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                // A broken read stream yields no further valid frames.
                warn!(conn = %conn.id(), "force closing connection: {e}");
                conn.close();
                break;
            }
        };

        let msg = match decoded {
            Ok(msg) => msg,
            Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                warn!(conn = %conn.id(), "force closing connection: {e}");
                conn.close();
                break;
            }
            Err(e) => {
                error!(conn = %conn.id(), "{e}");
                conn.send_error(e.into()).await;
                continue;
            }
        };

        if conn.dispatch(msg).await.is_break() {
            break;
        }
    }
}

fn decode_frame(bytes: &[u8], limit: usize) -> Result<OperationMessage, ProtocolError> {
    if bytes.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: bytes.len(),
            limit,
        });
    }
    OperationMessage::decode_slice(bytes)
}

async fn write_loop<S>(conn: Connection, mut sink: S, mut mailbox: mpsc::Receiver<OperationMessage>)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display + Send,
{
    let write_timeout = conn.inner.config.write_timeout;

    while let Some(msg) = mailbox.recv().await {
        let text = match msg.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(conn = %conn.id(), "failed to encode {} message: {e}", msg.kind);
                continue;
            }
        };

        match tokio::time::timeout(write_timeout, sink.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(conn = %conn.id(), "sending message failed: {e}");
                break;
            }
            Err(_) => {
                warn!(conn = %conn.id(), "sending message timed out after {write_timeout:?}");
                break;
            }
        }
    }

    // The write side is the only place the socket gets closed.
    mailbox.close();
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
    conn.close();
}
