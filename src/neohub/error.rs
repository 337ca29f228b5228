use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("invalid hub url '{0}'")]
    InvalidUrl(String),
    #[error("tls setup failed: {0}")]
    Tls(String),
    #[error("socket closed")]
    Closed,
    #[error("transport: {0}")]
    Other(String),
}

/// Why a conversation did not produce a response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConversationError {
    #[error("not connected to hub")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(#[from] TransportError),
    #[error("no response to '{command}' within {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("unparseable response: {0}")]
    Parse(String),
    #[error("response has no 'response' field")]
    MissingResponse,
    #[error("connection lost before response")]
    Disconnected,
    #[error("client shut down")]
    Closed,
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    #[error("unexpected frame with no conversation awaiting a response: {0}")]
    UnexpectedFrame(String),
}
