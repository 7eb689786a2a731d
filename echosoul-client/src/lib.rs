pub mod ai;
pub mod chat;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod listeners;
pub mod session;
pub mod transport;

pub use ai::{AiChatClient, AiChatMessage, AiEvent, AiEventKind, ConfirmationSource, SessionConfirmation};
pub use chat::{ChatClient, ChatEvent, ChatEventKind, OutgoingMessageOptions};
pub use config::{ClientConfig, Environment};
pub use connection::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionSettings, ConnectionState,
    FrameHandler,
};
pub use listeners::{Event, ListenerId, Listeners};
pub use session::{AiSessionState, Role, SessionUpdate, StreamAccumulator, TranscriptEntry};
pub use transport::{Connector, TransportEvent, TransportHandle, WsConnector};

use echosoul_proto::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection timeout")]
    ConnectTimeout,

    #[error("Connection attempt superseded by disconnect")]
    ConnectAborted,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
