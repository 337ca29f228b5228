//! transport.rs
//! Websocket plumbing between the blocking connection loop and the async socket.
//!
//! Each connect attempt is tagged with a generation number. Every event a socket task emits
//! carries that number, so the connection can ignore events from sockets it already replaced.

use crossbeam::channel::Sender;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{Connector as TlsConnector, connect_async_tls_with_config, tungstenite::Message};

use crate::neohub::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Connected,
    Text(String),
    Disconnected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(generation: u64, kind: TransportEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Outbound half of an open (or opening) socket.
pub trait Transport: Send {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
    fn close(&mut self);
}

/// Starts a connect attempt. Progress and inbound frames are reported on `events`.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        url: &str,
        generation: u64,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

// ============================================================================
// tokio-tungstenite
// ============================================================================

pub struct WsConnector {
    runtime: Handle,
    accept_invalid_certs: bool,
}

impl WsConnector {
    /// The hub serves a self-signed certificate, so certificate checks are off by default.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime, accept_invalid_certs: true }
    }

    pub fn with_certificate_checks(mut self) -> Self {
        self.accept_invalid_certs = false;
        self
    }

    fn tls(&self) -> Result<native_tls::TlsConnector, TransportError> {
        native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .danger_accept_invalid_hostnames(self.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::Tls(e.to_string()))
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        url: &str,
        generation: u64,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        let tls = self.tls()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = self
            .runtime
            .spawn(run_socket(url.to_string(), generation, events, outbound_rx, tls));
        Ok(Box::new(WsTransport { outbound: Some(outbound_tx), task }))
    }
}

struct WsTransport {
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let tx = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text.to_string()).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        // Dropping the sender lets the task send a close frame and exit on its own.
        self.outbound = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if self.outbound.is_some() {
            self.task.abort();
        }
    }
}

async fn run_socket(
    url: String,
    generation: u64,
    events: Sender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    tls: native_tls::TlsConnector,
) {
    let emit = |kind| {
        let _ = events.send(TransportEvent::new(generation, kind));
    };

    let connect =
        connect_async_tls_with_config(url.as_str(), None, true, Some(TlsConnector::NativeTls(tls))).await;
    let (ws, _) = match connect {
        Ok(value) => value,
        Err(err) => {
            warn!("[Transport] connect to {} failed: {}", url, err);
            emit(TransportEventKind::Disconnected(err.to_string()));
            return;
        }
    };
    info!("[Transport] connected to {} (generation {})", url, generation);
    emit(TransportEventKind::Connected);

    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        break err.to_string();
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break "closed locally".to_string();
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => emit(TransportEventKind::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    break format!("closed by hub: {:?}", frame);
                }
                Some(Ok(other)) => debug!("[Transport] ignoring non-text frame ({} bytes)", other.len()),
                Some(Err(err)) => break err.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };
    info!("[Transport] generation {} down: {}", generation, reason);
    emit(TransportEventKind::Disconnected(reason));
}
