pub mod connection;
pub mod conversation;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod transport;
pub mod zone;

pub use connection::{ConnectionState, ConnectionStats, NeohubConnection};
pub use conversation::{ConversationQueue, PendingReply};
pub use error::{ConversationError, ProtocolError, TransportError};
pub use manager::{NeohubManager, NeohubSettings, PollSummary};
pub use transport::{Connector, Transport, TransportEvent, TransportEventKind, WsConnector};
pub use zone::{ZoneRecord, ZoneTable};
