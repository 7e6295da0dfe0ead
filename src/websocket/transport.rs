//! Shared physical connection to the exchange push API.
//!
//! One [`Transport`] owns at most one socket, no matter how many channels are
//! subscribed over it. The socket is dialed lazily by the first operation that
//! needs it; callers arriving while a dial is in flight wait on that attempt's
//! completion signal instead of dialing again.
//!
//! Two kinds of task run behind a transport:
//!
//! - a single writer, fed by a bounded queue of `{message, result}` commands,
//!   which serializes every outbound frame and reports each write outcome;
//! - one reader per connection, which decodes frames, dispatches them to the
//!   [`SubscriptionRegistry`] in socket order and enforces the idle timeout.
//!
//! Any read error, close frame, EOF or idle expiry tears the connection down:
//! every subscriber's error slot receives the terminal error, a close frame is
//! attempted within a bounded time, and the next operation dials again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::Instrument;

use crate::network::DEFAULT_WS_URL;
use crate::websocket::codec::{self, DecodeError};
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::subscriptions::SubscriptionRegistry;
use crate::websocket::types::WsRequest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection is considered dead after this long without any inbound frame
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for sending the close frame on teardown
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection timeout duration for WebSocket connections
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint
    pub url: String,
    /// Idle window before the connection is torn down
    pub idle_timeout: Duration,
    /// Bound on the close frame write during teardown
    pub close_timeout: Duration,
    /// Bound on a single dial
    pub connect_timeout: Duration,
    /// Bound on a single frame write
    pub write_timeout: Duration,
    /// Capacity of the writer queue
    pub write_queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            idle_timeout: IDLE_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
            connect_timeout: CONNECTION_TIMEOUT,
            write_timeout: Duration::from_secs(10),
            write_queue_capacity: 16,
        }
    }
}

impl TransportConfig {
    /// Default timings against a custom endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

// ─── Internals ──────────────────────────────────────────────────────────────

/// Outcome of one dial, published once to every waiter.
type DialOutcome = Option<WsResult<Arc<Connection>>>;

enum Slot {
    Disconnected,
    Connecting(watch::Receiver<DialOutcome>),
    Connected(Arc<Connection>),
    Closing(u64),
}

struct WriteCommand {
    message: String,
    result: oneshot::Sender<WsResult<()>>,
}

struct Connection {
    id: u64,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    stop: Notify,
}

impl Connection {
    async fn send(&self, message: Message) -> WsResult<()> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send(message).await.map_err(WebSocketError::from),
            None => Err(WebSocketError::NotConnected),
        }
    }

    /// Best-effort close frame, then drop the write half.
    async fn close(&self, timeout: Duration) {
        self.stop.notify_one();

        let frame = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        match tokio::time::timeout(timeout, self.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(conn = self.id, error = %e, "Close frame not sent"),
            Err(_) => tracing::warn!(conn = self.id, "Timeout writing close frame"),
        }

        match tokio::time::timeout(timeout, self.sink.lock()).await {
            Ok(mut sink) => {
                sink.take();
            }
            // A stuck write still holds the sink; it is released with the last Arc.
            Err(_) => tracing::warn!(conn = self.id, "Write half busy, deferring hard close"),
        }
    }
}

struct TransportInner {
    config: TransportConfig,
    registry: SubscriptionRegistry,
    slot: Mutex<Slot>,
    commands: mpsc::Sender<WriteCommand>,
    closed: AtomicBool,
    next_conn_id: AtomicU64,
    dials: AtomicU64,
    span: tracing::Span,
}

impl TransportInner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        match &*self.lock_slot() {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting(_) => ConnectionState::Connecting,
            Slot::Connected(_) => ConnectionState::Connected,
            Slot::Closing(_) => ConnectionState::Closing,
        }
    }

    /// Current connection, dialing if there is none.
    async fn acquire(self: &Arc<Self>) -> WsResult<Arc<Connection>> {
        let mut outcome = {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Connected(conn) => return Ok(Arc::clone(conn)),
                Slot::Connecting(rx) => rx.clone(),
                Slot::Disconnected | Slot::Closing(_) => {
                    if self.closed.load(Ordering::Acquire) {
                        return Err(WebSocketError::NotConnected);
                    }
                    let (done, rx) = watch::channel(None);
                    *slot = Slot::Connecting(rx.clone());
                    // The dial runs on its own task so a cancelled caller
                    // cannot strand the other waiters.
                    tokio::spawn(Arc::clone(self).dial(done).instrument(self.span.clone()));
                    rx
                }
            }
        };

        let result = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WebSocketError::ChannelClosed)?
            .clone();
        result.unwrap_or(Err(WebSocketError::ChannelClosed))
    }

    async fn dial(self: Arc<Self>, done: watch::Sender<DialOutcome>) {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.dials.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn = id, url = %self.config.url, "Dialing");

        let dialed = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.as_str()),
        )
        .await;

        let result = match dialed {
            Err(_) => Err(WebSocketError::Timeout),
            Ok(Err(e)) => Err(WebSocketError::from(e)),
            Ok(Ok((stream, _response))) => {
                let (sink, source) = stream.split();
                Ok((
                    Arc::new(Connection {
                        id,
                        sink: tokio::sync::Mutex::new(Some(sink)),
                        stop: Notify::new(),
                    }),
                    source,
                ))
            }
        };

        let outcome = match result {
            Ok((conn, source)) => {
                let accepted = {
                    let mut slot = self.lock_slot();
                    if self.closed.load(Ordering::Acquire) {
                        *slot = Slot::Disconnected;
                        false
                    } else {
                        *slot = Slot::Connected(Arc::clone(&conn));
                        true
                    }
                };
                if accepted {
                    tracing::info!(conn = id, "Connected");
                    tokio::spawn(
                        Arc::clone(&self)
                            .read_loop(Arc::clone(&conn), source)
                            .instrument(self.span.clone()),
                    );
                    Ok(conn)
                } else {
                    conn.close(self.config.close_timeout).await;
                    Err(WebSocketError::NotConnected)
                }
            }
            Err(e) => {
                *self.lock_slot() = Slot::Disconnected;
                tracing::warn!(conn = id, error = %e, "Connection failed");
                Err(e)
            }
        };

        // Nobody waiting is fine: the slot already holds the outcome.
        let _ = done.send(Some(outcome));
    }

    async fn read_loop(self: Arc<Self>, conn: Arc<Connection>, mut source: WsSource) {
        let idle = self.config.idle_timeout;

        let terminal = loop {
            tokio::select! {
                _ = conn.stop.notified() => break None,
                read = tokio::time::timeout(idle, source.next()) => match read {
                    Err(_) => {
                        tracing::warn!(conn = conn.id, "No data within {:?}", idle);
                        break Some(WebSocketError::IdleTimeout(idle));
                    }
                    Ok(None) => {
                        break Some(WebSocketError::ConnectionClosed {
                            code: 1006,
                            reason: "Stream ended".to_string(),
                        });
                    }
                    Ok(Some(Err(e))) => break Some(WebSocketError::from(e)),
                    Ok(Some(Ok(Message::Text(text)))) => self.handle_text(text.as_str()),
                    Ok(Some(Ok(Message::Binary(data)))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_text(text),
                        Err(_) => tracing::debug!(conn = conn.id, "Ignoring non-UTF-8 binary frame"),
                    },
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        break Some(WebSocketError::ConnectionClosed { code, reason });
                    }
                    // tungstenite queues the pong reply itself
                    Ok(Some(Ok(_))) => {}
                },
            }
        };

        drop(source);
        if let Some(err) = terminal {
            self.teardown(&conn, err).await;
        }
    }

    fn handle_text(&self, text: &str) {
        match codec::decode(text) {
            Ok(frame) => {
                if let Some(update) = codec::aggregate(&frame) {
                    tracing::trace!(
                        channel = %frame.channel,
                        update = %codec::describe(&update),
                        "Dispatching update"
                    );
                    if !self.registry.dispatch(frame.channel, update) {
                        tracing::debug!(channel = %frame.channel, "No subscriber for channel");
                    }
                }
            }
            Err(DecodeError::Server(message)) => {
                tracing::warn!(message = %message, "Server reported an error");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to decode message"),
        }
    }

    /// Discard `conn` if it is still current, broadcasting `err` to subscribers.
    async fn teardown(&self, conn: &Arc<Connection>, err: WebSocketError) {
        {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Connected(current) if current.id == conn.id => {
                    *slot = Slot::Closing(conn.id);
                }
                _ => return,
            }
        }

        let notified = self.registry.notify_all(&err);
        tracing::warn!(conn = conn.id, error = %err, subscribers = notified, "Connection torn down");

        conn.close(self.config.close_timeout).await;

        let mut slot = self.lock_slot();
        if matches!(&*slot, Slot::Closing(id) if *id == conn.id) {
            *slot = Slot::Disconnected;
        }
    }

    async fn write(self: &Arc<Self>, message: String) -> WsResult<()> {
        let conn = self.acquire().await?;
        let sent = tokio::time::timeout(
            self.config.write_timeout,
            conn.send(Message::Text(message.into())),
        )
        .await;

        let err = match sent {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => WebSocketError::Timeout,
        };
        tracing::warn!(conn = conn.id, error = %err, "Write failed");
        self.teardown(&conn, err.clone()).await;
        Err(err)
    }
}

/// Single writer: one frame at a time, in queue order.
async fn write_loop(inner: Weak<TransportInner>, mut commands: mpsc::Receiver<WriteCommand>) {
    while let Some(command) = commands.recv().await {
        let Some(inner) = inner.upgrade() else {
            let _ = command.result.send(Err(WebSocketError::NotConnected));
            break;
        };
        let outcome = inner.write(command.message).await;
        // The caller may have stopped waiting.
        let _ = command.result.send(outcome);
    }
    tracing::debug!("Writer stopped");
}

fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}

// ─── Public handle ──────────────────────────────────────────────────────────

/// Handle to the shared connection. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Transport {
    /// Create a transport and start its writer task.
    ///
    /// Must be called from within a tokio runtime. No socket is opened until
    /// the first operation needs one.
    pub fn new(config: TransportConfig) -> Self {
        let (commands, commands_rx) = mpsc::channel(config.write_queue_capacity.max(1));
        let span = tracing::info_span!("transport", url = %config.url);

        let inner = Arc::new(TransportInner {
            config,
            registry: SubscriptionRegistry::new(),
            slot: Mutex::new(Slot::Disconnected),
            commands,
            closed: AtomicBool::new(false),
            next_conn_id: AtomicU64::new(1),
            dials: AtomicU64::new(0),
            span: span.clone(),
        });

        tokio::spawn(write_loop(Arc::downgrade(&inner), commands_rx).instrument(span));
        Self { inner }
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Channel subscriptions served by this transport
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Number of dial attempts made so far
    pub fn dial_count(&self) -> u64 {
        self.inner.dials.load(Ordering::Relaxed)
    }

    /// Ensure a connection exists, dialing if needed.
    pub async fn connect(&self) -> WsResult<()> {
        self.inner.acquire().await.map(|_| ())
    }

    /// Queue a request for the writer and wait for the write outcome.
    pub async fn send(&self, request: &WsRequest) -> WsResult<()> {
        let message = serde_json::to_string(request)?;
        self.send_text(message).await
    }

    /// Queue a raw text frame for the writer and wait for the write outcome.
    pub async fn send_text(&self, message: String) -> WsResult<()> {
        let (result, result_rx) = oneshot::channel();
        self.inner
            .commands
            .send(WriteCommand { message, result })
            .await?;
        result_rx.await.map_err(|_| WebSocketError::ChannelClosed)?
    }

    /// Shut the transport down for good.
    ///
    /// Tears down the current connection (subscribers receive
    /// [`WebSocketError::NotConnected`]); later operations fail instead of dialing.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let current = match &*self.inner.lock_slot() {
            Slot::Connected(conn) => Some(Arc::clone(conn)),
            _ => None,
        };
        if let Some(conn) = current {
            self.inner
                .teardown(&conn, WebSocketError::NotConnected)
                .await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
