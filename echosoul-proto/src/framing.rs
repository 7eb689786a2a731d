use crate::{OutboundFrame, ProtocolError, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Maximum frame size (10MB for safety)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Default maximum frame size for most deployments (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A decoded inbound frame whose payload has not been typed yet
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub frame_type: String,
    pub body: serde_json::Value,
}

impl RawFrame {
    /// Deserializes the frame body into its typed payload
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.body).map_err(|source| ProtocolError::InvalidPayload {
            frame_type: self.frame_type.clone(),
            source,
        })
    }
}

/// Serializes an outbound frame into the text sent over the socket
pub fn encode_frame(frame: &OutboundFrame) -> Result<String> {
    let text = serde_json::to_string(frame)?;
    debug!("Encoded frame of {} bytes, type: {}", text.len(), frame.type_name());
    Ok(text)
}

/// Parses one text frame received from the socket
pub fn decode_frame(text: &str, max_frame_size: usize) -> Result<RawFrame> {
    if text.len() > max_frame_size {
        warn!("Received oversized frame: {} bytes (max: {})", text.len(), max_frame_size);
        return Err(ProtocolError::FrameTooLarge(text.len(), max_frame_size));
    }

    let body: serde_json::Value = serde_json::from_str(text)?;

    let frame_type = body
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    debug!("Decoded frame type: {}", frame_type);

    Ok(RawFrame { frame_type, body })
}
