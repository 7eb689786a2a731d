use crate::types::{AiCharacter, Id, MessageType};
use serde::{Deserialize, Serialize};

/// `connection_established`: greeting sent right after the socket opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<Id>,
}

/// Result of a `start_ai_session` request.
///
/// Arrives either as the body of an `ai_session_started` frame or as the
/// `result` of a `response` frame whose `original_type` is `start_ai_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartPayload {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub character: Option<AiCharacter>,
    #[serde(default)]
    pub conversation_id: Option<Id>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `user_message_sent`: the server persisted a message the user wrote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageSent {
    #[serde(default)]
    pub message_id: Option<Id>,
    #[serde(default)]
    pub conversation_id: Option<Id>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `ai_stream_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStart {
    pub message_id: Id,
    #[serde(default)]
    pub conversation_id: Option<Id>,
}

/// `ai_stream_chunk`: one incremental fragment of the reply text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub message_id: Id,
    pub chunk: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `ai_stream_end`: carries the complete reply text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnd {
    pub message_id: Id,
    #[serde(default)]
    pub final_content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `ai_error`: the AI backend failed to serve a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiErrorFrame {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Numeric or symbolic error code
    #[serde(default)]
    pub code: Option<Id>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message_id: Option<Id>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl AiErrorFrame {
    pub fn text(&self) -> &str {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("unknown AI error")
    }
}

/// `response`: generic result wrapper for a previous request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// `type` of the request this answers
    #[serde(default)]
    pub original_type: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One stored message of a conversation history page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default, alias = "message_id")]
    pub id: Option<Id>,
    /// `user` or `ai`
    #[serde(default, alias = "sender_type")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, alias = "created_at")]
    pub timestamp: Option<String>,
}

/// `conversation_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    #[serde(default)]
    pub conversation_id: Option<Id>,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

/// `ai_characters`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCharacters {
    #[serde(default)]
    pub characters: Vec<AiCharacter>,
}

/// `new_message`: a message from another user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub message_id: Id,
    pub conversation_id: Id,
    pub sender_id: Id,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<Id>,
}

/// `typing_status`: another user started or stopped typing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingStatus {
    pub user_id: Id,
    pub is_typing: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `error`: protocol-level error from the messaging service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<Id>,
}

impl ServerError {
    pub fn text(&self) -> &str {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("unknown error")
    }
}
