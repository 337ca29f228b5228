//! Scripted stand-in for the hub: a `Connector` whose transport records outbound frames and,
//! optionally, answers them through a responder closure.

#![allow(dead_code)]

use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use serde_json::Value;

use manifold_control::neohub::{Connector, Transport, TransportError, TransportEvent, TransportEventKind};

pub type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Default)]
pub struct HubState {
    pub sent: Vec<Value>,
    pub events: Option<(u64, Sender<TransportEvent>)>,
    pub refuse: bool,
    /// Accept the socket but never finish the handshake.
    pub silent: bool,
    pub connect_attempts: u64,
}

#[derive(Clone)]
pub struct ScriptedHub {
    pub state: Arc<Mutex<HubState>>,
    responder: Option<Responder>,
}

impl ScriptedHub {
    /// Never answers on its own; the test pushes replies.
    pub fn manual() -> Self {
        Self { state: Arc::default(), responder: None }
    }

    pub fn answering(responder: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static) -> Self {
        Self { state: Arc::default(), responder: Some(Arc::new(responder)) }
    }

    pub fn sent_commands(&self) -> Vec<Value> {
        self.state.lock().sent.clone()
    }

    /// Deliver a `response` frame carrying `payload` as JSON text.
    pub fn reply(&self, payload: &Value) {
        let frame = serde_json::json!({ "response": payload.to_string() }).to_string();
        self.push(TransportEventKind::Text(frame));
    }

    pub fn push(&self, kind: TransportEventKind) {
        let state = self.state.lock();
        if let Some((generation, tx)) = &state.events {
            let _ = tx.send(TransportEvent::new(*generation, kind));
        }
    }
}

/// Undo the envelope: outer JSON, inner JSON text, single-quoted command.
pub fn decode_command(frame: &str) -> Value {
    let outer: Value = serde_json::from_str(frame).expect("outer json");
    let inner: Value = serde_json::from_str(outer["message"].as_str().expect("message text")).expect("inner json");
    let cmd = inner["COMMANDS"][0]["COMMAND"].as_str().expect("command").replace('\'', "\"");
    serde_json::from_str(&cmd).expect("command json")
}

struct ScriptedTransport {
    hub: ScriptedHub,
}

impl Transport for ScriptedTransport {
    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let command = decode_command(text);
        self.hub.state.lock().sent.push(command.clone());
        if let Some(responder) = &self.hub.responder {
            if let Some(payload) = responder(&command) {
                self.hub.reply(&payload);
            }
        }
        Ok(())
    }

    fn close(&mut self) {}
}

impl Connector for ScriptedHub {
    fn connect(
        &self,
        _url: &str,
        generation: u64,
        events: Sender<TransportEvent>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.refuse {
            return Err(TransportError::Other("refused".into()));
        }
        if state.silent {
            return Ok(Box::new(ScriptedTransport { hub: self.clone() }));
        }
        let _ = events.send(TransportEvent::new(generation, TransportEventKind::Connected));
        state.events = Some((generation, events));
        Ok(Box::new(ScriptedTransport { hub: self.clone() }))
    }
}
