//! connection.rs
//! Connection to the heating hub.
//!
//! Owns the socket lifecycle and the conversation queue. A worker thread pumps transport
//! events into the queue and drives its sends and timeouts; callers submit commands from any
//! thread and receive results through their `PendingReply`.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    concurrency::DiagMutex,
    neohub::{
        conversation::{Conversation, ConversationQueue, FrameSink, PendingReply, QueueStats},
        envelope::wrap_command,
        error::{ConversationError, TransportError},
        transport::{Connector, Transport, TransportEvent, TransportEventKind},
    },
};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5_000);
const EVENT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

pub type DisconnectHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connects: u64,
    pub disconnects: u64,
    pub stale_events: u64,
    pub queue: QueueStats,
}

struct Link {
    state: ConnectionState,
    generation: u64,
    token: String,
    transport: Option<Box<dyn Transport>>,
    queue: ConversationQueue,
    connects: u64,
    disconnects: u64,
}

struct WireSink<'a> {
    connected: bool,
    transport: &'a mut Option<Box<dyn Transport>>,
}

impl FrameSink for WireSink<'_> {
    fn send_frame(&mut self, frame: &str) -> Result<(), ConversationError> {
        if !self.connected {
            return Err(ConversationError::NotConnected);
        }
        match self.transport.as_mut() {
            Some(t) => t.send_text(frame).map_err(ConversationError::from),
            None => Err(ConversationError::NotConnected),
        }
    }
}

pub struct NeohubConnection {
    link: Arc<DiagMutex<Link>>,
    connector: Arc<dyn Connector>,
    events_tx: Sender<TransportEvent>,
    disconnect_handler: Arc<Mutex<Option<DisconnectHandler>>>,
    stale_events: Arc<AtomicU64>,
    events_rx: Mutex<Option<Receiver<TransportEvent>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl NeohubConnection {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = unbounded();
        let link = Arc::new(DiagMutex::new(
            "neohub_link",
            Link {
                state: ConnectionState::Disconnected,
                generation: 0,
                token: String::new(),
                transport: None,
                queue: ConversationQueue::new(),
                connects: 0,
                disconnects: 0,
            },
        ));
        Self {
            link,
            connector,
            events_tx,
            disconnect_handler: Arc::new(Mutex::new(None)),
            stale_events: Arc::new(AtomicU64::new(0)),
            events_rx: Mutex::new(Some(events_rx)),
            running: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    /// The protocol loop starts with the first `open`.
    fn ensure_worker(&self) {
        if let Some(events_rx) = self.events_rx.lock().take() {
            let handle = self.spawn_worker(events_rx);
            *self.worker.lock() = Some(handle);
        }
    }

    fn spawn_worker(&self, events_rx: Receiver<TransportEvent>) -> thread::JoinHandle<()> {
        let link = Arc::clone(&self.link);
        let handler = Arc::clone(&self.disconnect_handler);
        let stale = Arc::clone(&self.stale_events);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("neohub-protocol".into())
            .spawn(move || {
                info!("[NeohubConnection] connection worker started");
                while running.load(Ordering::SeqCst) {
                    match events_rx.recv_timeout(EVENT_POLL) {
                        Ok(event) => {
                            if let Some(reason) = handle_event(&link, &stale, event) {
                                let callback = handler.lock().clone();
                                if let Some(cb) = callback {
                                    cb(&reason);
                                }
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    pump(&link);
                }
                info!("[NeohubConnection] connection worker stopped");
            })
            .expect("Failed to spawn neohub protocol thread")
    }

    /// Begin connecting. Returns immediately; poll `state()` or use `wait_connected`.
    /// A no-op while a connection is open or opening.
    pub fn open(&self, url: &str, token: &str) -> Result<(), TransportError> {
        self.ensure_worker();
        let mut link = self.link.lock("neohub.open");
        if link.state != ConnectionState::Disconnected {
            return Ok(());
        }
        link.generation += 1;
        link.token = token.to_string();
        let generation = link.generation;
        let transport = self.connector.connect(url, generation, self.events_tx.clone())?;
        link.transport = Some(transport);
        link.state = ConnectionState::Connecting;
        info!("[NeohubConnection] connecting to {} (generation {})", url, generation);
        Ok(())
    }

    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                ConnectionState::Connected => return true,
                ConnectionState::Disconnected => return false,
                ConnectionState::Connecting => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.link.lock("neohub.state").state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queue `command` (plain JSON text). Fails through the reply when not connected.
    pub fn send(&self, command: &str, timeout: Duration) -> PendingReply {
        let now = Instant::now();
        let mut guard = self.link.lock("neohub.send");
        let link = &mut *guard;
        let frame = wrap_command(&link.token, command);
        let (conv, reply) = Conversation::new(command, frame, timeout, now);
        let mut sink = WireSink {
            connected: link.state == ConnectionState::Connected,
            transport: &mut link.transport,
        };
        link.queue.submit(conv, &mut sink, now);
        reply
    }

    /// Blocking send. The queue enforces `timeout`; the extra margin covers worker latency.
    pub fn command(&self, command: &str, timeout: Duration) -> Result<Value, ConversationError> {
        self.send(command, timeout).wait(timeout + EVENT_POLL * 4)
    }

    pub fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self.disconnect_handler.lock() = Some(handler);
    }

    pub fn pending(&self) -> usize {
        self.link.lock("neohub.pending").queue.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        let link = self.link.lock("neohub.stats");
        ConnectionStats {
            connects: link.connects,
            disconnects: link.disconnects,
            stale_events: self.stale_events.load(Ordering::Relaxed),
            queue: link.queue.stats(),
        }
    }

    pub fn close(&self) {
        let mut link = self.link.lock("neohub.close");
        drop_link(&mut link, ConversationError::Closed);
    }

    /// Drop a handshake that is still pending so the next `open` starts a new generation.
    /// Returns false when the link is not `Connecting`.
    pub fn abandon_connect(&self) -> bool {
        let mut link = self.link.lock("neohub.abandon_connect");
        if link.state != ConnectionState::Connecting {
            return false;
        }
        warn!("[NeohubConnection] handshake for generation {} abandoned", link.generation);
        drop_link(&mut link, ConversationError::Disconnected);
        true
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.close();
    }
}

impl Drop for NeohubConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tear down the socket, failing everything still queued.
fn drop_link(link: &mut Link, err: ConversationError) {
    if let Some(mut t) = link.transport.take() {
        t.close();
    }
    if link.state != ConnectionState::Disconnected {
        link.disconnects += 1;
    }
    link.state = ConnectionState::Disconnected;
    link.queue.fail_all(err);
}

/// Apply one event. Returns the reason when the connection was lost.
fn handle_event(link: &DiagMutex<Link>, stale: &AtomicU64, event: TransportEvent) -> Option<String> {
    let mut link = link.lock("neohub.event");
    if event.generation != link.generation {
        stale.fetch_add(1, Ordering::Relaxed);
        debug!("[NeohubConnection] dropping event from stale generation {}", event.generation);
        return None;
    }
    match event.kind {
        TransportEventKind::Connected => {
            if link.state != ConnectionState::Connecting {
                debug!("[NeohubConnection] late handshake for generation {} ignored", event.generation);
                return None;
            }
            link.state = ConnectionState::Connected;
            link.connects += 1;
            info!("[NeohubConnection] connected");
            None
        }
        TransportEventKind::Text(text) => {
            if let Err(e) = link.queue.on_frame(&text) {
                warn!("[NeohubConnection] {}", e);
            }
            None
        }
        TransportEventKind::Disconnected(reason) => {
            if link.state == ConnectionState::Disconnected {
                return None;
            }
            warn!("[NeohubConnection] connection lost: {}", reason);
            drop_link(&mut link, ConversationError::Disconnected);
            Some(reason)
        }
    }
}

fn pump(link: &DiagMutex<Link>) {
    let mut guard = link.lock("neohub.pump");
    let link = &mut *guard;
    if link.queue.is_empty() {
        return;
    }
    let mut sink = WireSink {
        connected: link.state == ConnectionState::Connected,
        transport: &mut link.transport,
    };
    link.queue.process(&mut sink, Instant::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Records outbound frames; the test plays the hub by pushing events.
    struct FakeConnector {
        sent: Arc<Mutex<Vec<String>>>,
        events: Arc<Mutex<Option<(u64, Sender<TransportEvent>)>>>,
    }

    struct FakeTransport {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for FakeTransport {
        fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }
        fn close(&mut self) {}
    }

    impl Connector for FakeConnector {
        fn connect(
            &self,
            _url: &str,
            generation: u64,
            events: Sender<TransportEvent>,
        ) -> Result<Box<dyn Transport>, TransportError> {
            *self.events.lock() = Some((generation, events));
            Ok(Box::new(FakeTransport { sent: Arc::clone(&self.sent) }))
        }
    }

    fn setup() -> (NeohubConnection, Arc<Mutex<Vec<String>>>, Arc<Mutex<Option<(u64, Sender<TransportEvent>)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::new(Mutex::new(None));
        let connector = FakeConnector { sent: Arc::clone(&sent), events: Arc::clone(&events) };
        (NeohubConnection::new(Arc::new(connector)), sent, events)
    }

    fn push(events: &Mutex<Option<(u64, Sender<TransportEvent>)>>, kind: TransportEventKind) {
        let guard = events.lock();
        let (generation, tx) = guard.as_ref().unwrap();
        tx.send(TransportEvent::new(*generation, kind)).unwrap();
    }

    #[test]
    fn send_before_connect_fails_immediately() {
        let (conn, sent, _events) = setup();
        let result = conn.command(r#"{"GET_ZONES":0}"#, Duration::from_millis(200));
        assert_eq!(result, Err(ConversationError::NotConnected));
        assert!(sent.lock().is_empty());
        conn.shutdown();
    }

    #[test]
    fn response_is_routed_to_caller() {
        let (conn, sent, events) = setup();
        conn.open("wss://hub:4243", "tok").unwrap();
        push(&events, TransportEventKind::Connected);
        assert!(conn.wait_connected(Duration::from_secs(1)));

        let reply = conn.send(r#"{"GET_ZONES":0}"#, Duration::from_secs(2));
        assert_eq!(sent.lock().len(), 1);
        assert!(sent.lock()[0].contains("{'GET_ZONES':0}"));
        push(&events, TransportEventKind::Text(json!({"response": "{\"Hall\":1}"}).to_string()));
        assert_eq!(reply.wait(Duration::from_secs(1)), Ok(json!({"Hall": 1})));
        conn.shutdown();
    }

    #[test]
    fn disconnect_fails_pending_and_notifies() {
        let (conn, _sent, events) = setup();
        let notified = Arc::new(AtomicU64::new(0));
        let n = Arc::clone(&notified);
        conn.set_disconnect_handler(Arc::new(move |_reason| {
            n.fetch_add(1, Ordering::SeqCst);
        }));
        conn.open("wss://hub:4243", "tok").unwrap();
        push(&events, TransportEventKind::Connected);
        assert!(conn.wait_connected(Duration::from_secs(1)));

        let reply = conn.send(r#"{"GET_ZONES":0}"#, Duration::from_secs(5));
        push(&events, TransportEventKind::Disconnected("reset".into()));
        assert_eq!(reply.wait(Duration::from_secs(1)), Err(ConversationError::Disconnected));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(conn.stats().disconnects, 1);
        conn.shutdown();
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let (conn, _sent, events) = setup();
        conn.open("wss://hub:4243", "tok").unwrap();
        let old_tx = events.lock().as_ref().map(|(_, tx)| tx.clone()).unwrap();
        old_tx.send(TransportEvent::new(99, TransportEventKind::Connected)).unwrap();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.stats().stale_events, 1);
        conn.shutdown();
    }

    #[test]
    fn abandoned_handshake_ignores_late_connect() {
        let (conn, _sent, events) = setup();
        conn.open("wss://hub:4243", "tok").unwrap();
        assert!(!conn.wait_connected(Duration::from_millis(50)));
        assert!(conn.abandon_connect());
        assert!(!conn.abandon_connect());

        push(&events, TransportEventKind::Connected);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.open("wss://hub:4243", "tok").unwrap();
        push(&events, TransportEventKind::Connected);
        assert!(conn.wait_connected(Duration::from_secs(1)));
        conn.shutdown();
    }

    #[test]
    fn unanswered_command_times_out() {
        let (conn, _sent, events) = setup();
        conn.open("wss://hub:4243", "tok").unwrap();
        push(&events, TransportEventKind::Connected);
        assert!(conn.wait_connected(Duration::from_secs(1)));
        let result = conn.command(r#"{"INFO":["Hall"]}"#, Duration::from_millis(150));
        assert!(matches!(result, Err(ConversationError::Timeout { .. })));
        assert_eq!(conn.pending(), 0);
        conn.shutdown();
    }
}
