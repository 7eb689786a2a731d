use crate::types::{now_timestamp, Id, MessageType};
use serde::{Deserialize, Serialize};

/// Frames the client sends to the server, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Heartbeat, no payload
    Ping,
    StartAiSession {
        ai_character_id: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<Id>,
    },
    EndAiSession,
    ChatMessage(ChatMessagePayload),
    GetConversationHistory {
        conversation_id: Id,
        limit: u32,
    },
    GetAiCharacters,
    TypingStatus {
        is_typing: bool,
        timestamp: String,
    },
    GetHistory {
        conversation_id: Id,
        page: u32,
        limit: u32,
    },
    GetOnlineStatus {
        user_id: Id,
    },
}

/// Body of a `chat_message` frame.
///
/// The messaging service reads the file metadata and `reply_to_id`, the AI
/// service reads `user_id` and `ai_character_id`. Absent fields are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub conversation_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_character_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Id>,
}

impl ChatMessagePayload {
    pub fn new(conversation_id: Id, content: String, message_type: MessageType) -> Self {
        Self {
            content,
            message_type,
            conversation_id,
            user_id: None,
            ai_character_id: None,
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to_id: None,
        }
    }
}

impl OutboundFrame {
    /// Wire discriminator, as echoed back in `response.original_type`
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundFrame::Ping => "ping",
            OutboundFrame::StartAiSession { .. } => "start_ai_session",
            OutboundFrame::EndAiSession => "end_ai_session",
            OutboundFrame::ChatMessage(_) => "chat_message",
            OutboundFrame::GetConversationHistory { .. } => "get_conversation_history",
            OutboundFrame::GetAiCharacters => "get_ai_characters",
            OutboundFrame::TypingStatus { .. } => "typing_status",
            OutboundFrame::GetHistory { .. } => "get_history",
            OutboundFrame::GetOnlineStatus { .. } => "get_online_status",
        }
    }

    pub fn ping() -> Self {
        OutboundFrame::Ping
    }

    pub fn start_ai_session(ai_character_id: Id, conversation_id: Option<Id>) -> Self {
        OutboundFrame::StartAiSession {
            ai_character_id,
            conversation_id,
        }
    }

    pub fn end_ai_session() -> Self {
        OutboundFrame::EndAiSession
    }

    pub fn chat_message(payload: ChatMessagePayload) -> Self {
        OutboundFrame::ChatMessage(payload)
    }

    pub fn get_conversation_history(conversation_id: Id, limit: u32) -> Self {
        OutboundFrame::GetConversationHistory {
            conversation_id,
            limit,
        }
    }

    pub fn get_ai_characters() -> Self {
        OutboundFrame::GetAiCharacters
    }

    /// Typing indicator stamped with the current time
    pub fn typing_status(is_typing: bool) -> Self {
        OutboundFrame::TypingStatus {
            is_typing,
            timestamp: now_timestamp(),
        }
    }

    pub fn get_history(conversation_id: Id, page: u32, limit: u32) -> Self {
        OutboundFrame::GetHistory {
            conversation_id,
            page,
            limit,
        }
    }

    pub fn get_online_status(user_id: Id) -> Self {
        OutboundFrame::GetOnlineStatus { user_id }
    }
}
