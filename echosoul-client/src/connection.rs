use crate::endpoint::redact;
use crate::listeners::{Event, ListenerId, Listeners};
use crate::transport::{Connector, TransportEvent, TransportHandle};
use crate::{ClientError, Result};
use echosoul_proto::{decode_frame, encode_frame, OutboundFrame, RawFrame, DEFAULT_MAX_FRAME_SIZE};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Timing and limits of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub max_frame_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Lost the socket, a reconnect is scheduled
    Reconnecting { attempt: u32 },
    /// Disconnected, failed, or gave up reconnecting
    Closed,
}

/// Lifecycle events of the socket itself
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    /// Torn down by [`Connection::disconnect`]
    Disconnected,
    Error(String),
    /// Closed by the peer or the network
    Closed { code: Option<u16>, reason: String },
    /// Automatic reconnection stopped after this many attempts
    ReconnectExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Connect,
    Disconnect,
    Error,
    Close,
    ReconnectExhausted,
}

impl Event for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Connected => ConnectionEventKind::Connect,
            ConnectionEvent::Disconnected => ConnectionEventKind::Disconnect,
            ConnectionEvent::Error(_) => ConnectionEventKind::Error,
            ConnectionEvent::Closed { .. } => ConnectionEventKind::Close,
            ConnectionEvent::ReconnectExhausted { .. } => ConnectionEventKind::ReconnectExhausted,
        }
    }
}

/// Protocol-specific half of a session client
pub trait FrameHandler: Send + Sync + 'static {
    /// Called for every well-formed inbound frame, in arrival order
    fn handle_frame(&self, frame: RawFrame);

    /// Frame sent on every heartbeat tick
    fn heartbeat_frame(&self) -> OutboundFrame {
        OutboundFrame::ping()
    }
}

struct Inner {
    state: ConnectionState,
    /// Bumped on every connect attempt and on disconnect; events tagged with
    /// an older value belong to a socket that no longer matters
    generation: u64,
    reconnect_attempts: u32,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    /// Only ever holds a reconnect that is still waiting out its delay
    reconnect: Option<JoinHandle<()>>,
}

impl Inner {
    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_heartbeat();
        self.cancel_reconnect();
        if let Some(task) = self.reader.take() {
            task.abort();
        }
    }
}

struct Shared<C> {
    url: String,
    connector: C,
    settings: ConnectionSettings,
    handler: Arc<dyn FrameHandler>,
    listeners: Listeners<ConnectionEvent>,
    inner: Mutex<Inner>,
}

/// Handle to one managed socket. Clones share the same socket.
///
/// Lifecycle: `Idle -> Connecting -> Open`, then `Reconnecting { attempt }`
/// after an unexpected close (at most `max_reconnect_attempts` in a row) or
/// `Closed` after [`Connection::disconnect`]. While open a heartbeat frame goes
/// out every `heartbeat_interval`.
pub struct Connection<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: Connector> Connection<C> {
    pub fn new(
        url: String,
        connector: C,
        settings: ConnectionSettings,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                url,
                connector,
                settings,
                handler,
                listeners: Listeners::new(),
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    generation: 0,
                    reconnect_attempts: 0,
                    outgoing: None,
                    reader: None,
                    heartbeat: None,
                    reconnect: None,
                }),
            }),
        }
    }

    /// Opens the socket.
    ///
    /// Returns immediately when already connecting or open. A failed open
    /// emits [`ConnectionEvent::Error`], schedules a reconnect and returns the
    /// error.
    pub async fn connect(&self) -> Result<()> {
        let generation = {
            let mut inner = self.lock();
            if matches!(inner.state, ConnectionState::Connecting | ConnectionState::Open) {
                debug!("connect() ignored, connection is {:?}", inner.state);
                return Ok(());
            }
            inner.cancel_reconnect();
            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.generation
        };

        info!("Connecting to {}...", redact(&self.shared.url));

        match self.shared.connector.open(&self.shared.url).await {
            Ok(handle) => self.on_open(generation, handle),
            Err(e) => {
                self.on_open_failed(generation, &e);
                Err(e)
            }
        }
    }

    /// Closes the socket and stops heartbeat and any pending reconnect.
    ///
    /// Safe to call repeatedly; only the call that actually tears something
    /// down emits [`ConnectionEvent::Disconnected`].
    pub fn disconnect(&self) {
        let was_active = {
            let mut inner = self.lock();
            inner.cancel_reconnect();
            inner.stop_heartbeat();
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            let had_transport = inner.outgoing.take().is_some();
            let was_active = had_transport
                || !matches!(inner.state, ConnectionState::Idle | ConnectionState::Closed);
            inner.state = ConnectionState::Closed;
            inner.generation += 1;
            was_active
        };

        if !was_active {
            debug!("disconnect() on an already disconnected connection");
            return;
        }

        info!("Disconnected from {}", redact(&self.shared.url));
        self.shared.listeners.emit(&ConnectionEvent::Disconnected);
    }

    /// Sends a frame if the socket is open.
    ///
    /// Frames sent while not connected are logged and dropped, never queued.
    /// Returns whether the frame was handed to the socket.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        let outgoing = {
            let inner = self.lock();
            match inner.state {
                ConnectionState::Open => inner.outgoing.clone(),
                _ => None,
            }
        };

        let Some(outgoing) = outgoing else {
            error!("WebSocket is not connected, dropping {} frame", frame.type_name());
            return false;
        };

        let text = match encode_frame(frame) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} frame: {}", frame.type_name(), e);
                return false;
            }
        };

        if outgoing.send(text).is_err() {
            error!("Socket already gone, dropping {} frame", frame.type_name());
            return false;
        }

        debug!("Sent {} frame", frame.type_name());
        true
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Automatic reconnects made since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared.settings
    }

    pub fn on<F>(&self, kind: ConnectionEventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.on(kind, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.listeners.off(id)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn from_weak(shared: &Weak<Shared<C>>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.lock();
        inner.generation == generation && inner.state == ConnectionState::Open
    }

    fn on_open(&self, generation: u64, handle: TransportHandle) -> Result<()> {
        let TransportHandle { outgoing, incoming } = handle;

        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                // Dropping the handle closes the socket again
                warn!("Discarding socket opened by a superseded connect attempt");
                return Err(ClientError::ConnectAborted);
            }
            inner.state = ConnectionState::Open;
            inner.reconnect_attempts = 0;
            inner.outgoing = Some(outgoing);
            inner.stop_heartbeat();
            inner.heartbeat = Some(self.spawn_heartbeat(generation));
        }

        info!("Connected to {}", redact(&self.shared.url));
        self.shared.listeners.emit(&ConnectionEvent::Connected);

        // The reader starts after `Connected` went out, so no frame can be
        // dispatched before it
        let reader = tokio::spawn(read_loop(Arc::downgrade(&self.shared), generation, incoming));
        let mut inner = self.lock();
        if inner.generation == generation {
            if let Some(old) = inner.reader.replace(reader) {
                old.abort();
            }
        } else {
            reader.abort();
        }

        Ok(())
    }

    fn on_open_failed(&self, generation: u64, err: &ClientError) {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.state = ConnectionState::Closed;
        }

        error!("Failed to connect to {}: {}", redact(&self.shared.url), err);
        self.shared
            .listeners
            .emit(&ConnectionEvent::Error(err.to_string()));
        self.schedule_reconnect();
    }

    fn on_transport_closed(&self, generation: u64, code: Option<u16>, reason: String) {
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Open {
                return;
            }
            inner.state = ConnectionState::Closed;
            inner.outgoing = None;
            inner.stop_heartbeat();
            // Called from the reader task itself, let it finish on its own
            inner.reader.take();
        }

        warn!("Connection closed (code: {:?}, reason: {})", code, reason);
        self.shared
            .listeners
            .emit(&ConnectionEvent::Closed { code, reason });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let max = self.shared.settings.max_reconnect_attempts;
        let delay = self.shared.settings.reconnect_delay;

        let mut inner = self.lock();
        if inner.reconnect_attempts >= max {
            let attempts = inner.reconnect_attempts;
            inner.state = ConnectionState::Closed;
            drop(inner);

            error!("Giving up on {} after {} reconnect attempts", redact(&self.shared.url), attempts);
            self.shared
                .listeners
                .emit(&ConnectionEvent::ReconnectExhausted { attempts });
            return;
        }

        inner.reconnect_attempts += 1;
        let attempt = inner.reconnect_attempts;
        inner.state = ConnectionState::Reconnecting { attempt };
        info!("Reconnecting in {:?} (attempt {}/{})", delay, attempt, max);

        inner.cancel_reconnect();
        inner.reconnect = Some(tokio::spawn(reconnect_after(Arc::downgrade(&self.shared), delay)));
    }

    fn dispatch(&self, text: &str) {
        match decode_frame(text, self.shared.settings.max_frame_size) {
            Ok(frame) if frame.frame_type == "pong" => debug!("Heartbeat acknowledged"),
            Ok(frame) => self.shared.handler.handle_frame(frame),
            Err(e) => error!("Dropping malformed frame: {}", e),
        }
    }

    fn spawn_heartbeat(&self, generation: u64) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.settings.heartbeat_interval;
        // Counted from the open, not from when the task first gets polled
        let start = Instant::now() + period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(conn) = Connection::from_weak(&shared) else {
                    return;
                };
                if !conn.is_current(generation) {
                    return;
                }
                debug!("Sending heartbeat");
                conn.send(&conn.shared.handler.heartbeat_frame());
            }
        })
    }
}

async fn read_loop<C: Connector>(
    shared: Weak<Shared<C>>,
    generation: u64,
    mut incoming: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = incoming.recv().await {
        let Some(conn) = Connection::from_weak(&shared) else {
            return;
        };
        if !conn.is_current(generation) {
            debug!("Ignoring event from a stale socket");
            return;
        }

        match event {
            TransportEvent::Text(text) => conn.dispatch(&text),
            TransportEvent::Error(reason) => {
                warn!("Transport error: {}", reason);
                conn.shared.listeners.emit(&ConnectionEvent::Error(reason));
            }
            TransportEvent::Closed { code, reason } => {
                conn.on_transport_closed(generation, code, reason);
                return;
            }
        }
    }

    if let Some(conn) = Connection::from_weak(&shared) {
        conn.on_transport_closed(generation, None, "transport stream ended".to_string());
    }
}

/// Boxed so the reconnect task, which calls `connect`, has a nameable type
fn reconnect_after<C: Connector>(
    shared: Weak<Shared<C>>,
    delay: Duration,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;

        let Some(conn) = Connection::from_weak(&shared) else {
            return;
        };
        // From here on this task is an ordinary connect attempt, not a
        // cancellable pending reconnect
        conn.lock().reconnect.take();

        if let Err(e) = conn.connect().await {
            debug!("Reconnect attempt failed: {}", e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;
    use serde_json::json;

    const URL: &str = "ws://localhost:8000/api/ws/1";

    struct RecordingHandler {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FrameHandler for RecordingHandler {
        fn handle_frame(&self, frame: RawFrame) {
            self.log.lock().unwrap().push(format!("frame:{}", frame.frame_type));
        }
    }

    fn describe(event: &ConnectionEvent) -> String {
        match event {
            ConnectionEvent::Connected => "connect".to_string(),
            ConnectionEvent::Disconnected => "disconnect".to_string(),
            ConnectionEvent::Error(e) => format!("error:{}", e),
            ConnectionEvent::Closed { code, .. } => format!("close:{:?}", code),
            ConnectionEvent::ReconnectExhausted { attempts } => format!("exhausted:{}", attempts),
        }
    }

    fn setup(connector: MockConnector) -> (Connection<MockConnector>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(RecordingHandler { log: log.clone() });
        let conn = Connection::new(URL.to_string(), connector, ConnectionSettings::default(), handler);

        for kind in [
            ConnectionEventKind::Connect,
            ConnectionEventKind::Disconnect,
            ConnectionEventKind::Error,
            ConnectionEventKind::Close,
            ConnectionEventKind::ReconnectExhausted,
        ] {
            let log = log.clone();
            conn.on(kind, move |event| log.lock().unwrap().push(describe(event)));
        }

        (conn, log)
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn count(log: &Arc<Mutex<Vec<String>>>, entry: &str) -> usize {
        log.lock().unwrap().iter().filter(|e| e.as_str() == entry).count()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_connect_opens_transport_and_emits_connect() {
        let connector = MockConnector::new();
        let (conn, log) = setup(connector.clone());

        assert_eq!(conn.state(), ConnectionState::Idle);
        conn.connect().await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.reconnect_attempts(), 0);
        assert_eq!(connector.opened_urls(), vec![URL.to_string()]);
        assert_eq!(entries(&log), vec!["connect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_while_connecting_or_open() {
        let connector = MockConnector::delayed(Duration::from_secs(1));
        let (conn, log) = setup(connector.clone());

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        settle().await;
        assert_eq!(conn.state(), ConnectionState::Connecting);

        conn.connect().await.unwrap();
        assert_eq!(connector.open_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        first.await.unwrap().unwrap();
        assert!(conn.is_connected());

        conn.connect().await.unwrap();
        assert_eq!(connector.open_count(), 1);
        assert_eq!(count(&log, "connect"), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let connector = MockConnector::new();
        let (conn, log) = setup(connector.clone());

        conn.connect().await.unwrap();
        let mut link = connector.take_link();

        conn.disconnect();
        conn.disconnect();

        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(count(&log, "disconnect"), 1);
        // Socket was released
        assert!(matches!(
            link.sent.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_emits_nothing() {
        let (conn, log) = setup(MockConnector::new());

        conn.disconnect();

        assert!(entries(&log).is_empty());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_is_bounded() {
        let connector = MockConnector::failing();
        let (conn, log) = setup(connector.clone());

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectFailed(_)));
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 1 });

        for _ in 0..10 {
            tokio::time::advance(RECONNECT_DELAY).await;
            settle().await;
        }

        // Initial attempt plus five automatic ones
        assert_eq!(connector.open_count(), 6);
        assert_eq!(conn.reconnect_attempts(), MAX_RECONNECT_ATTEMPTS);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(count(&log, "exhausted:5"), 1);
        assert_eq!(
            log.lock().unwrap().iter().filter(|e| e.starts_with("error:")).count(),
            6
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_cadence() {
        let connector = MockConnector::new();
        let (conn, _log) = setup(connector.clone());

        conn.connect().await.unwrap();
        let mut link = connector.take_link();

        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert!(link.sent_frames().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(link.sent_frames(), vec![json!({ "type": "ping" })]);

        tokio::time::advance(HEARTBEAT_INTERVAL).await;
        settle().await;
        assert_eq!(link.sent_frames().len(), 1);

        conn.disconnect();
        for _ in 0..3 {
            tokio::time::advance(HEARTBEAT_INTERVAL).await;
            settle().await;
        }
        assert!(link.sent_frames().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_closed_is_dropped() {
        let connector = MockConnector::new();
        let (conn, log) = setup(connector.clone());

        assert!(!conn.send(&OutboundFrame::ping()));

        conn.connect().await.unwrap();
        let mut link = connector.take_link();
        assert!(conn.send(&OutboundFrame::get_ai_characters()));
        assert_eq!(link.sent_frames(), vec![json!({ "type": "get_ai_characters" })]);

        conn.disconnect();
        assert!(!conn.send(&OutboundFrame::get_ai_characters()));
        assert!(!entries(&log).iter().any(|e| e.starts_with("error:")));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let connector = MockConnector::new();
        let (conn, log) = setup(connector.clone());

        conn.connect().await.unwrap();
        let link = connector.take_link();

        link.push_text("not-json");
        link.push_text(r#"{"no_type":true}"#);
        link.push_json(json!({ "type": "pong" }));
        link.push_json(json!({ "type": "new_message" }));
        settle().await;

        assert_eq!(entries(&log), vec!["connect", "frame:new_message"]);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_fires_before_first_frame() {
        let connector = MockConnector::new();
        connector.queue_on_open(TransportEvent::Text(r#"{"type":"connection_established"}"#.to_string()));
        let (conn, log) = setup(connector.clone());

        conn.connect().await.unwrap();
        settle().await;

        assert_eq!(entries(&log), vec!["connect", "frame:connection_established"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_reconnects() {
        let connector = MockConnector::new();
        let (conn, log) = setup(connector.clone());

        conn.connect().await.unwrap();
        let link = connector.take_link();

        link.close(1006, "abnormal closure");
        settle().await;

        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert!(!conn.is_connected());
        assert_eq!(count(&log, "close:Some(1006)"), 1);

        tokio::time::advance(RECONNECT_DELAY).await;
        settle().await;

        assert_eq!(connector.open_count(), 2);
        assert!(conn.is_connected());
        assert_eq!(conn.reconnect_attempts(), 0);
        assert_eq!(count(&log, "connect"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let connector = MockConnector::new();
        let (conn, log) = setup(connector.clone());

        conn.connect().await.unwrap();
        let link = connector.take_link();
        link.close(1001, "going away");
        settle().await;
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 1 });

        conn.disconnect();
        for _ in 0..5 {
            tokio::time::advance(RECONNECT_DELAY).await;
            settle().await;
        }

        assert_eq!(connector.open_count(), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(count(&log, "disconnect"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting_discards_socket() {
        let connector = MockConnector::delayed(Duration::from_secs(1));
        let (conn, log) = setup(connector.clone());

        let pending = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        settle().await;

        conn.disconnect();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(matches!(pending.await.unwrap(), Err(ClientError::ConnectAborted)));
        assert!(!conn.is_connected());
        assert_eq!(count(&log, "connect"), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_reported() {
        let connector = MockConnector::new();
        let (conn, log) = setup(connector.clone());

        conn.connect().await.unwrap();
        let link = connector.take_link();
        link.inbound
            .send(TransportEvent::Error("connection reset".to_string()))
            .unwrap();
        settle().await;

        assert_eq!(count(&log, "error:connection reset"), 1);
        assert!(conn.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_restarts_after_reconnect() {
        let connector = MockConnector::new();
        let (conn, _log) = setup(connector.clone());

        conn.connect().await.unwrap();
        let mut first = connector.take_link();

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        first.close(1006, "abnormal closure");
        settle().await;

        tokio::time::advance(RECONNECT_DELAY).await;
        settle().await;
        assert!(conn.is_connected());
        let mut second = connector.take_link();

        // Old schedule would have fired 30s after the first open
        tokio::time::advance(HEARTBEAT_INTERVAL - Duration::from_secs(1)).await;
        settle().await;
        assert!(first.sent_frames().is_empty());
        assert!(second.sent_frames().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert!(first.sent_frames().is_empty());
        assert_eq!(second.sent_frames(), vec![json!({ "type": "ping" })]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_connect_while_reconnecting() {
        let connector = MockConnector::failing();
        let (conn, _log) = setup(connector.clone());

        assert!(conn.connect().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 1 });

        // Replaces the pending timer with an immediate attempt
        assert!(conn.connect().await.is_err());
        assert_eq!(connector.open_count(), 2);
        assert_eq!(conn.reconnect_attempts(), 2);
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 2 });

        tokio::time::advance(RECONNECT_DELAY).await;
        settle().await;

        assert_eq!(connector.open_count(), 3);
        assert_eq!(conn.reconnect_attempts(), 3);
    }
}
