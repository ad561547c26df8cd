//! # Realtime Channel
//!
//! Persistent connection to the server's event stream with automatic
//! reconnection, heartbeats and a bounded event history.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Realtime Connection States                           │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐  hello ► welcome        │
//! │  │Disconnected│ ──────────────► │ Connecting │ ─────────────────┐      │
//! │  └────────────┘                 └─────┬──────┘                  │      │
//! │        ▲                              │ refused / error frame   ▼      │
//! │        │                              ▼                  ┌───────────┐ │
//! │        │                        ┌────────────┐           │ Connected │ │
//! │        │                        │   Error    │           └─────┬─────┘ │
//! │        │                        └─────┬──────┘                 │       │
//! │        │                              │ backoff     transport lost /   │
//! │        │                              ▼             heartbeat timeout  │
//! │        │   disconnect()         ┌────────────┐                 │       │
//! │        └─────────────────────── │Reconnecting│ ◄───────────────┘       │
//! │                                 └─────┬──────┘                         │
//! │                                       │ attempts exhausted             │
//! │                                       ▼                                │
//! │                                 Error (terminal until connect())       │
//! │                                                                         │
//! │  BACKOFF: delay(n) = min(base * 2^n, max), no jitter                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Envelope
//! Every frame is a JSON object `{"type": "...", "payload": ...}`.
//!
//! | Direction | type                | Meaning                            |
//! |-----------|---------------------|------------------------------------|
//! | out       | `hello`             | `{terminalId, namespace}`          |
//! | in        | `welcome` / `error` | handshake accepted / refused       |
//! | out       | `ping`              | heartbeat                          |
//! | in        | `product:updated`   | catalog row changed                |
//! | in        | `inventory:updated` | remote stock changed               |
//! | in        | `low-stock:alert`   | remote low-stock notice            |
//!
//! Any inbound frame counts as liveness. Events never touch the ledger; they
//! are handed to subscribers and may schedule a debounced catalog sync.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use url::Url;

use keel_core::Clock;

use crate::config::RealtimeSettings;
use crate::error::{SyncError, SyncResult};

const HELLO: &str = "hello";
const WELCOME: &str = "welcome";
const ERROR: &str = "error";
const PING: &str = "ping";
const PONG: &str = "pong";

// =============================================================================
// Connection State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Server events the channel understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum EventKind {
    #[serde(rename = "product:updated")]
    ProductUpdated,
    #[serde(rename = "inventory:updated")]
    InventoryUpdated,
    #[serde(rename = "low-stock:alert")]
    LowStockAlert,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProductUpdated => "product:updated",
            EventKind::InventoryUpdated => "inventory:updated",
            EventKind::LowStockAlert => "low-stock:alert",
        }
    }

    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "product:updated" => Some(EventKind::ProductUpdated),
            "inventory:updated" => Some(EventKind::InventoryUpdated),
            "low-stock:alert" => Some(EventKind::LowStockAlert),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RealtimeEvent {
    pub kind: EventKind,
    #[ts(type = "unknown")]
    pub payload: Value,
    #[ts(as = "String")]
    pub received_at: DateTime<Utc>,
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> SyncResult<Self> {
        serde_json::from_str(text).map_err(|e| SyncError::InvalidMessage(e.to_string()))
    }
}

// =============================================================================
// Transport Seam
// =============================================================================

/// Opens connections to the event stream.
#[async_trait]
pub trait RealtimeTransport: Send + Sync + fmt::Debug {
    async fn connect(&self, namespace: &str) -> SyncResult<Box<dyn RealtimeConnection>>;
}

/// One open connection.
#[async_trait]
pub trait RealtimeConnection: Send {
    async fn emit(&mut self, envelope: &Envelope) -> SyncResult<()>;

    /// The next inbound frame; `None` once the server has closed the stream.
    async fn next_envelope(&mut self) -> Option<SyncResult<Envelope>>;

    async fn close(&mut self) -> SyncResult<()>;
}

/// What the channel tells the sync orchestrator.
#[async_trait]
pub trait SyncTrigger: Send + Sync {
    /// Runs a catalog-only sync.
    async fn catalog_sync(&self);

    fn realtime_state_changed(&self, state: ConnectionState);
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// [`RealtimeTransport`] over a WebSocket (tokio-tungstenite).
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(url: &str) -> SyncResult<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidUrl(format!(
                "Realtime URL must start with ws:// or wss://, got: {}",
                url
            )));
        }
        Ok(Self { url })
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self, namespace: &str) -> SyncResult<Box<dyn RealtimeConnection>> {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("namespace", namespace);

        let (stream, response) = connect_async(url.as_str()).await?;
        debug!(status = ?response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RealtimeConnection for WsConnection {
    async fn emit(&mut self, envelope: &Envelope) -> SyncResult<()> {
        let json = envelope.to_json()?;
        self.stream.send(WsMessage::Text(json.into())).await?;
        Ok(())
    }

    async fn next_envelope(&mut self) -> Option<SyncResult<Envelope>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Envelope::from_json(&text)),
                Ok(WsMessage::Close(frame)) => {
                    info!(?frame, "Received close frame");
                    return None;
                }
                Ok(WsMessage::Binary(_)) => warn!("Received unexpected binary message"),
                // ping/pong/raw frames are handled by tungstenite
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

// =============================================================================
// Reconnect Backoff
// =============================================================================

/// Reconnect schedule: `min(base * 2^n, max)` for at most `max_attempts`
/// consecutive failures (0 = unlimited).
#[derive(Debug)]
pub struct ReconnectBackoff {
    schedule: ExponentialBackoff,
    attempts: u32,
    max_attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        let mut schedule = ExponentialBackoff {
            initial_interval: base,
            max_interval: max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        // current_interval starts at the crate default, not at `base`
        schedule.reset();

        Self {
            schedule,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self::new(
            settings.backoff_base(),
            settings.backoff_max(),
            settings.max_reconnect_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts > 0 && self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        self.schedule.next_backoff()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.schedule.reset();
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

pub type EventHandler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

struct Registered {
    kind: EventKind,
    handler: EventHandler,
    delivered: u64,
}

#[derive(Default)]
struct HandlerRegistry {
    next_id: u64,
    handlers: BTreeMap<u64, Registered>,
}

/// Handle to a registered event handler.
///
/// The handler stays registered until [`Subscription::dispose`] is called or
/// the handle is dropped.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<HandlerRegistry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Events delivered to this handler so far.
    pub fn delivered(&self) -> u64 {
        self.registry
            .upgrade()
            .and_then(|r| lock(&r).handlers.get(&self.id).map(|h| h.delivered))
            .unwrap_or(0)
    }

    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).handlers.remove(&self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

// =============================================================================
// Stats
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChannelStats {
    /// Successful handshakes.
    pub connects: u64,
    pub reconnect_attempts: u64,
    pub events_received: u64,
    /// Handler invocations.
    pub events_delivered: u64,
    /// Frames that were neither events nor protocol messages.
    pub frames_ignored: u64,
    pub catalog_syncs_triggered: u64,
    pub active_subscriptions: usize,
    #[ts(as = "Option<String>")]
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// =============================================================================
// Realtime Channel
// =============================================================================

struct Shared {
    settings: RealtimeSettings,
    terminal_id: String,
    transport: Arc<dyn RealtimeTransport>,
    trigger: Option<Arc<dyn SyncTrigger>>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ConnectionState>,
    registry: Arc<Mutex<HandlerRegistry>>,
    history: Mutex<VecDeque<RealtimeEvent>>,
    stats: Arc<Mutex<ChannelStats>>,
    debounce_generation: Arc<AtomicU64>,
    intentional: AtomicBool,
}

struct Worker {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

enum SessionEnd {
    Shutdown,
    Lost(SyncError),
}

/// Client side of the server event stream.
///
/// ## Usage
/// ```rust,ignore
/// let channel = RealtimeChannel::new(settings, terminal_id, transport, clock)
///     .with_trigger(orchestrator.clone());
///
/// let _sub = channel.on(EventKind::InventoryUpdated, |event| {
///     println!("inventory changed: {}", event.payload);
/// });
/// channel.connect();
/// ```
pub struct RealtimeChannel {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl RealtimeChannel {
    /// A `history_size` of 0 is raised to 1.
    pub fn new(
        mut settings: RealtimeSettings,
        terminal_id: impl Into<String>,
        transport: Arc<dyn RealtimeTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        settings.history_size = settings.history_size.max(1);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Shared {
            history: Mutex::new(VecDeque::with_capacity(settings.history_size)),
            settings,
            terminal_id: terminal_id.into(),
            transport,
            trigger: None,
            clock,
            state,
            registry: Arc::new(Mutex::new(HandlerRegistry::default())),
            stats: Arc::new(Mutex::new(ChannelStats::default())),
            debounce_generation: Arc::new(AtomicU64::new(0)),
            intentional: AtomicBool::new(false),
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    /// Reports state changes and event bursts to `trigger`.
    ///
    /// Must be called before [`connect`](Self::connect).
    pub fn with_trigger(mut self, trigger: Arc<dyn SyncTrigger>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.trigger = Some(trigger);
        } else {
            warn!("Realtime channel already running, trigger ignored");
        }
        self
    }

    /// Starts the connection task. A no-op while one is already running.
    pub fn connect(&self) {
        let mut worker = lock(&self.worker);
        if let Some(w) = worker.as_ref() {
            if !w.task.is_finished() {
                debug!("Realtime channel already running");
                return;
            }
        }

        self.shared.intentional.store(false, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(run(self.shared.clone(), shutdown_rx));
        *worker = Some(Worker { shutdown_tx, task });

        info!(namespace = %self.shared.settings.namespace, "Realtime channel starting");
    }

    /// Closes the connection, or cancels a pending reconnect, and waits for
    /// the connection task to stop.
    pub async fn disconnect(&self) {
        self.shared.intentional.store(true, Ordering::SeqCst);
        // pending debounced syncs are dropped
        self.shared.debounce_generation.fetch_add(1, Ordering::SeqCst);

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.shutdown_tx.send(()).await;
            if let Err(e) = worker.task.await {
                warn!(?e, "Realtime task ended abnormally");
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        info!("Realtime channel disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_intentionally_disconnected(&self) -> bool {
        self.shared.intentional.load(Ordering::SeqCst)
    }

    /// Registers `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.shared.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.insert(
            id,
            Registered {
                kind,
                handler: Arc::new(handler),
                delivered: 0,
            },
        );

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.shared.registry),
        }
    }

    /// The most recent events, oldest first.
    pub fn recent_events(&self) -> Vec<RealtimeEvent> {
        lock(&self.shared.history).iter().cloned().collect()
    }

    pub fn stats(&self) -> ChannelStats {
        let mut stats = lock(&self.shared.stats).clone();
        stats.active_subscriptions = lock(&self.shared.registry).handlers.len();
        stats
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("namespace", &self.shared.settings.namespace)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Connection Task
// =============================================================================

async fn run(shared: Arc<Shared>, mut shutdown_rx: mpsc::Receiver<()>) {
    let mut backoff = ReconnectBackoff::from_settings(&shared.settings);
    let mut reconnecting = false;

    loop {
        shared.set_state(if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let attempt = tokio::select! {
            result = shared.establish() => result,
            _ = shutdown_rx.recv() => break,
        };

        match attempt {
            Ok(conn) => {
                backoff.reset();
                shared.on_connected();

                match shared.session(conn, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(e) => {
                        warn!(error = %e, "Realtime connection lost");
                        shared.record_error(&e);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, attempt = backoff.attempts() + 1, "Realtime connect failed");
                shared.record_error(&e);
                shared.set_state(ConnectionState::Error);
            }
        }

        reconnecting = true;
        let Some(delay) = backoff.next_delay() else {
            error!(
                attempts = backoff.attempts(),
                "Realtime reconnect attempts exhausted"
            );
            shared.set_state(ConnectionState::Error);
            return;
        };

        shared.set_state(ConnectionState::Reconnecting);
        lock(&shared.stats).reconnect_attempts += 1;
        debug!(?delay, attempt = backoff.attempts(), "Waiting before reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => {
                debug!("Shutdown during backoff");
                break;
            }
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    debug!("Realtime task stopped");
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Realtime state changed");
            if let Some(trigger) = &self.trigger {
                trigger.realtime_state_changed(state);
            }
        }
    }

    fn on_connected(&self) {
        {
            let mut stats = lock(&self.stats);
            stats.connects += 1;
            stats.last_connected_at = Some(self.clock.now());
        }
        self.set_state(ConnectionState::Connected);
        info!(namespace = %self.settings.namespace, "Realtime channel connected");
    }

    fn record_error(&self, error: &SyncError) {
        lock(&self.stats).last_error = Some(error.to_string());
    }

    /// Connect plus handshake, bounded by the connect timeout.
    async fn establish(&self) -> SyncResult<Box<dyn RealtimeConnection>> {
        let limit = self.settings.connect_timeout();
        match timeout(limit, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::HandshakeFailed(format!(
                "no welcome within {:?}",
                limit
            ))),
        }
    }

    async fn handshake(&self) -> SyncResult<Box<dyn RealtimeConnection>> {
        let mut conn = self.transport.connect(&self.settings.namespace).await?;
        conn.emit(&Envelope::new(
            HELLO,
            json!({
                "terminalId": self.terminal_id,
                "namespace": self.settings.namespace,
            }),
        ))
        .await?;

        loop {
            let frame = conn.next_envelope().await.ok_or_else(|| {
                SyncError::HandshakeFailed("connection closed during handshake".into())
            })??;

            match frame.kind.as_str() {
                WELCOME => return Ok(conn),
                ERROR => return Err(SyncError::HandshakeFailed(error_message(&frame.payload))),
                other => debug!(kind = other, "Ignoring frame before welcome"),
            }
        }
    }

    async fn session(
        &self,
        mut conn: Box<dyn RealtimeConnection>,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> SessionEnd {
        let interval = self.settings.heartbeat_interval();
        let patience = self.settings.heartbeat_timeout();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reply_deadline: Option<Instant> = None;

        loop {
            let deadline = reply_deadline;
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    if let Err(e) = conn.close().await {
                        debug!(error = %e, "Error while closing realtime connection");
                    }
                    return SessionEnd::Shutdown;
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = conn.emit(&Envelope::new(PING, Value::Null)).await {
                        return SessionEnd::Lost(e);
                    }
                    if reply_deadline.is_none() {
                        reply_deadline = Some(Instant::now() + patience);
                    }
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    return SessionEnd::Lost(SyncError::HeartbeatTimeout(patience));
                }

                frame = conn.next_envelope() => match frame {
                    None => return SessionEnd::Lost(SyncError::Disconnected),
                    Some(Err(e @ SyncError::InvalidMessage(_))) => {
                        // still proof of life
                        reply_deadline = None;
                        warn!(error = %e, "Failed to parse realtime frame");
                        lock(&self.stats).frames_ignored += 1;
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e),
                    Some(Ok(envelope)) => {
                        reply_deadline = None;
                        self.dispatch(envelope);
                    }
                },
            }
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        let Some(kind) = EventKind::from_wire(&envelope.kind) else {
            match envelope.kind.as_str() {
                PONG | WELCOME => {}
                other => {
                    debug!(kind = other, "Ignoring unknown realtime frame");
                    lock(&self.stats).frames_ignored += 1;
                }
            }
            return;
        };

        let event = RealtimeEvent {
            kind,
            payload: envelope.payload,
            received_at: self.clock.now(),
        };

        {
            let mut history = lock(&self.history);
            while history.len() >= self.settings.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // handlers run outside the registry lock so they may subscribe or
        // dispose without deadlocking
        let handlers: Vec<(u64, EventHandler)> = lock(&self.registry)
            .handlers
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .map(|(id, r)| (*id, r.handler.clone()))
            .collect();
        for (_, handler) in &handlers {
            handler(&event);
        }
        {
            let mut registry = lock(&self.registry);
            for (id, _) in &handlers {
                if let Some(r) = registry.handlers.get_mut(id) {
                    r.delivered += 1;
                }
            }
        }
        {
            let mut stats = lock(&self.stats);
            stats.events_received += 1;
            stats.events_delivered += handlers.len() as u64;
        }
        debug!(kind = %kind, handlers = handlers.len(), "Realtime event received");

        if self.settings.catalog_sync_on_events {
            self.schedule_catalog_sync();
        }
    }

    /// Runs a catalog sync once events stop arriving for the debounce period.
    fn schedule_catalog_sync(&self) {
        let Some(trigger) = self.trigger.clone() else {
            return;
        };

        let generation = self.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.debounce_generation.clone();
        let stats = self.stats.clone();
        let delay = self.settings.debounce();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            lock(&stats).catalog_syncs_triggered += 1;
            debug!("Debounced catalog sync triggered by realtime events");
            trigger.catalog_sync().await;
        });
    }
}

fn error_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(
            EventKind::from_wire("inventory:updated"),
            Some(EventKind::InventoryUpdated)
        );
        assert_eq!(EventKind::from_wire("pong"), None);
        assert_eq!(
            serde_json::to_string(&EventKind::LowStockAlert).unwrap(),
            "\"low-stock:alert\""
        );
    }

    #[test]
    fn test_envelope_json() {
        let env = Envelope::from_json(r#"{"type":"welcome"}"#).unwrap();
        assert_eq!(env.kind, "welcome");
        assert_eq!(env.payload, Value::Null);
        assert!(Envelope::from_json("not json").is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(500), Duration::from_secs(4), 0);
        let delays: Vec<Duration> = (0..8).filter_map(|_| backoff.next_delay()).collect();

        assert_eq!(delays.len(), 8);
        assert_eq!(delays[0].as_millis(), 500);
        assert_eq!(delays[1].as_millis(), 1000);
        assert_eq!(delays[2].as_millis(), 2000);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(4)));
        assert_eq!(delays[7].as_millis(), 4000);
    }

    #[test]
    fn test_backoff_attempt_cap_and_reset() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(100), Duration::from_secs(1), 2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay().map(|d| d.as_millis()), Some(100));
    }

    #[test]
    fn test_error_message_from_payload() {
        assert_eq!(error_message(&json!({"message": "bad token"})), "bad token");
        assert_eq!(error_message(&json!("nope")), "\"nope\"");
    }
}
