pub mod types;
pub mod messages;
pub mod inbound;
pub mod framing;

pub use types::*;
pub use messages::*;
pub use inbound::*;
pub use framing::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Frame has no string `type` field")]
    MissingType,

    #[error("Invalid payload for frame type {frame_type}: {source}")]
    InvalidPayload {
        frame_type: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
