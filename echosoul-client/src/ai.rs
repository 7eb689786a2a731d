use crate::connection::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionSettings, ConnectionState,
    FrameHandler,
};
use crate::endpoint::ai_chat_url;
use crate::listeners::{Event, ListenerId, Listeners};
use crate::transport::{Connector, WsConnector};
use crate::Result;
use echosoul_proto::{
    AiCharacter, AiCharacters, AiErrorFrame, ChatMessagePayload, ConnectionEstablished,
    ConversationHistory, Id, MessageType, OutboundFrame, ProtocolError, RawFrame, ResponseFrame,
    SessionStartPayload, StreamChunk, StreamEnd, StreamStart, UserMessageSent,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

const START_SESSION_TYPE: &str = "start_ai_session";

/// Which server frame confirmed the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationSource {
    /// `ai_session_started`
    Dedicated,
    /// `response` with `original_type == "start_ai_session"`
    Response,
}

/// Outcome of `start_ai_session`, whichever frame carried it.
///
/// Without an explicit `success` flag a confirmation counts as successful when
/// it names a conversation or a character.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfirmation {
    pub source: ConfirmationSource,
    pub success: bool,
    pub character: Option<AiCharacter>,
    pub conversation_id: Option<Id>,
    pub message: Option<String>,
}

impl SessionConfirmation {
    fn new(
        source: ConfirmationSource,
        success: Option<bool>,
        payload: SessionStartPayload,
        message: Option<String>,
    ) -> Self {
        let success = success
            .unwrap_or(payload.conversation_id.is_some() || payload.character.is_some());
        Self {
            source,
            success,
            character: payload.character,
            conversation_id: payload.conversation_id,
            message,
        }
    }

    fn dedicated(payload: SessionStartPayload) -> Self {
        let message = payload.message.clone();
        Self::new(ConfirmationSource::Dedicated, payload.success, payload, message)
    }

    fn from_response(response: ResponseFrame) -> std::result::Result<Self, ProtocolError> {
        let payload = match response.result {
            Some(result) => serde_json::from_value(result).map_err(|source| {
                ProtocolError::InvalidPayload {
                    frame_type: "response".to_string(),
                    source,
                }
            })?,
            None => SessionStartPayload {
                success: None,
                character: None,
                conversation_id: None,
                message: None,
            },
        };

        let success = payload.success.or(response.success);
        let message = payload
            .message
            .clone()
            .or(response.error)
            .or(response.message);
        Ok(Self::new(ConfirmationSource::Response, success, payload, message))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AiEvent {
    ConnectionEstablished(ConnectionEstablished),
    SessionStarted(SessionConfirmation),
    UserMessageSent(UserMessageSent),
    StreamStart(StreamStart),
    StreamChunk(StreamChunk),
    StreamEnd(StreamEnd),
    AiError(AiErrorFrame),
    /// Any `response` frame other than a session start confirmation
    Response(ResponseFrame),
    ConversationHistory(ConversationHistory),
    AiCharacters(AiCharacters),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AiEventKind {
    ConnectionEstablished,
    SessionStarted,
    UserMessageSent,
    StreamStart,
    StreamChunk,
    StreamEnd,
    AiError,
    Response,
    ConversationHistory,
    AiCharacters,
}

impl AiEventKind {
    pub const ALL: [AiEventKind; 10] = [
        AiEventKind::ConnectionEstablished,
        AiEventKind::SessionStarted,
        AiEventKind::UserMessageSent,
        AiEventKind::StreamStart,
        AiEventKind::StreamChunk,
        AiEventKind::StreamEnd,
        AiEventKind::AiError,
        AiEventKind::Response,
        AiEventKind::ConversationHistory,
        AiEventKind::AiCharacters,
    ];
}

impl Event for AiEvent {
    type Kind = AiEventKind;

    fn kind(&self) -> AiEventKind {
        match self {
            AiEvent::ConnectionEstablished(_) => AiEventKind::ConnectionEstablished,
            AiEvent::SessionStarted(_) => AiEventKind::SessionStarted,
            AiEvent::UserMessageSent(_) => AiEventKind::UserMessageSent,
            AiEvent::StreamStart(_) => AiEventKind::StreamStart,
            AiEvent::StreamChunk(_) => AiEventKind::StreamChunk,
            AiEvent::StreamEnd(_) => AiEventKind::StreamEnd,
            AiEvent::AiError(_) => AiEventKind::AiError,
            AiEvent::Response(_) => AiEventKind::Response,
            AiEvent::ConversationHistory(_) => AiEventKind::ConversationHistory,
            AiEvent::AiCharacters(_) => AiEventKind::AiCharacters,
        }
    }
}

/// A message the user writes to an AI character
#[derive(Debug, Clone, PartialEq)]
pub struct AiChatMessage {
    pub content: String,
    pub message_type: MessageType,
    pub conversation_id: Id,
    /// Defaults to the client's own user id
    pub user_id: Option<Id>,
    pub ai_character_id: Option<Id>,
}

impl AiChatMessage {
    pub fn text(conversation_id: Id, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_type: MessageType::Text,
            conversation_id,
            user_id: None,
            ai_character_id: None,
        }
    }

    pub fn with_character(mut self, ai_character_id: Id) -> Self {
        self.ai_character_id = Some(ai_character_id);
        self
    }
}

struct AiDispatcher {
    listeners: Arc<Listeners<AiEvent>>,
}

impl AiDispatcher {
    fn to_event(frame: &RawFrame) -> std::result::Result<Option<AiEvent>, ProtocolError> {
        let event = match frame.frame_type.as_str() {
            "connection_established" => AiEvent::ConnectionEstablished(frame.payload()?),
            "ai_session_started" => {
                AiEvent::SessionStarted(SessionConfirmation::dedicated(frame.payload()?))
            }
            "response" => {
                let response: ResponseFrame = frame.payload()?;
                if response.original_type == START_SESSION_TYPE {
                    AiEvent::SessionStarted(SessionConfirmation::from_response(response)?)
                } else {
                    AiEvent::Response(response)
                }
            }
            "user_message_sent" => AiEvent::UserMessageSent(frame.payload()?),
            "ai_stream_start" => AiEvent::StreamStart(frame.payload()?),
            "ai_stream_chunk" => AiEvent::StreamChunk(frame.payload()?),
            "ai_stream_end" => AiEvent::StreamEnd(frame.payload()?),
            "ai_error" => AiEvent::AiError(frame.payload()?),
            "conversation_history" => AiEvent::ConversationHistory(frame.payload()?),
            "ai_characters" => AiEvent::AiCharacters(frame.payload()?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

impl FrameHandler for AiDispatcher {
    fn handle_frame(&self, frame: RawFrame) {
        match Self::to_event(&frame) {
            Ok(Some(event)) => {
                debug!("AI event: {:?}", event.kind());
                self.listeners.emit(&event);
            }
            Ok(None) => warn!("Unhandled AI message type: {}", frame.frame_type),
            Err(e) => warn!("Dropping frame: {}", e),
        }
    }

    fn heartbeat_frame(&self) -> OutboundFrame {
        OutboundFrame::ping()
    }
}

/// AI chat session client
pub struct AiChatClient<C: Connector = WsConnector> {
    user_id: Id,
    connection: Connection<C>,
    listeners: Arc<Listeners<AiEvent>>,
}

impl<C: Connector> Clone for AiChatClient<C> {
    fn clone(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            connection: self.connection.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<C: Connector> AiChatClient<C> {
    pub fn new(
        base_url: &str,
        user_id: Id,
        token: &str,
        connector: C,
        settings: ConnectionSettings,
    ) -> Self {
        let listeners = Arc::new(Listeners::new());
        let dispatcher = Arc::new(AiDispatcher {
            listeners: listeners.clone(),
        });
        let url = ai_chat_url(base_url, &user_id, token);

        Self {
            user_id,
            connection: Connection::new(url, connector, settings, dispatcher),
            listeners,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub fn disconnect(&self) {
        self.connection.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn user_id(&self) -> &Id {
        &self.user_id
    }

    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    pub fn on<F>(&self, kind: AiEventKind, callback: F) -> ListenerId
    where
        F: Fn(&AiEvent) + Send + Sync + 'static,
    {
        self.listeners.on(kind, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    pub fn on_connection<F>(&self, kind: ConnectionEventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.connection.on(kind, callback)
    }

    pub fn off_connection(&self, id: ListenerId) -> bool {
        self.connection.off(id)
    }

    /// Asks the server to open (or resume) a conversation with a character
    pub fn start_ai_session(&self, ai_character_id: Id, conversation_id: Option<Id>) -> bool {
        self.connection
            .send(&OutboundFrame::start_ai_session(ai_character_id, conversation_id))
    }

    pub fn end_ai_session(&self) -> bool {
        self.connection.send(&OutboundFrame::end_ai_session())
    }

    pub fn send_chat_message(&self, message: AiChatMessage) -> bool {
        let mut payload =
            ChatMessagePayload::new(message.conversation_id, message.content, message.message_type);
        payload.user_id = Some(message.user_id.unwrap_or_else(|| self.user_id.clone()));
        payload.ai_character_id = message.ai_character_id;

        self.connection.send(&OutboundFrame::chat_message(payload))
    }

    /// Requests stored messages, [`DEFAULT_HISTORY_LIMIT`] when `limit` is None
    pub fn get_conversation_history(&self, conversation_id: Id, limit: Option<u32>) -> bool {
        self.connection.send(&OutboundFrame::get_conversation_history(
            conversation_id,
            limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        ))
    }

    pub fn get_ai_characters(&self) -> bool {
        self.connection.send(&OutboundFrame::get_ai_characters())
    }
}
