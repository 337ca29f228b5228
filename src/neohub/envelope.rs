//! envelope.rs
//! Hub wire format.
//!
//! Outbound: `{"message_type":"hm_get_command_queue","message":"<inner>"}` where `<inner>` is
//! JSON text `{"token":"<token>","COMMANDS":[{"COMMAND":"<cmd>","COMMANDID":1}]}` and `<cmd>`
//! spells its own quotes as single quotes (the hub's command parser expects that dialect).
//! Field order is fixed by struct declaration order.
//!
//! Inbound: a JSON object whose `response` field carries the reply, usually as JSON text.

use serde::Serialize;
use serde_json::Value;

use crate::neohub::error::ConversationError;

pub const MESSAGE_TYPE: &str = "hm_get_command_queue";

#[derive(Serialize)]
struct Outer<'a> {
    message_type: &'a str,
    message: String,
}

#[derive(Serialize)]
struct CommandQueue<'a> {
    token: &'a str,
    #[serde(rename = "COMMANDS")]
    commands: [QueuedCommand; 1],
}

#[derive(Serialize)]
struct QueuedCommand {
    #[serde(rename = "COMMAND")]
    command: String,
    #[serde(rename = "COMMANDID")]
    command_id: u32,
}

/// `{"INFO":["A"]}` → `{'INFO':['A']}`.
pub fn to_hub_dialect(command: &str) -> String {
    command.replace('"', "'")
}

pub fn wrap_command(token: &str, command: &str) -> String {
    let inner = CommandQueue {
        token,
        commands: [QueuedCommand { command: to_hub_dialect(command), command_id: 1 }],
    };
    let outer = Outer {
        message_type: MESSAGE_TYPE,
        // Serialising plain structs of strings cannot fail.
        message: serde_json::to_string(&inner).unwrap_or_default(),
    };
    serde_json::to_string(&outer).unwrap_or_default()
}

/// Extract the reply payload from an inbound frame.
pub fn parse_response(frame: &str) -> Result<Value, ConversationError> {
    let mut value: Value =
        serde_json::from_str(frame).map_err(|e| ConversationError::Parse(e.to_string()))?;
    let response = value
        .get_mut("response")
        .map(Value::take)
        .ok_or(ConversationError::MissingResponse)?;
    match response {
        // Nested JSON text is decoded; anything else (e.g. a bare status word) is returned as is.
        Value::String(text) => Ok(serde_json::from_str(&text).unwrap_or(Value::String(text))),
        other => Ok(other),
    }
}

/// Numbers arrive as JSON numbers or numeric strings.
pub fn number_field(obj: &Value, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Booleans arrive as `true`/`false`, 0/1 or their string forms.
pub fn bool_field(obj: &Value, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
