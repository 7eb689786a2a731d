use crate::connection::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionSettings, ConnectionState,
    FrameHandler,
};
use crate::endpoint::chat_url;
use crate::listeners::{Event, ListenerId, Listeners};
use crate::transport::{Connector, WsConnector};
use crate::Result;
use echosoul_proto::{
    ChatMessagePayload, Id, MessageType, NewMessage, OutboundFrame, RawFrame, ResponseFrame,
    ServerError, TypingStatus,
};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    NewMessage(NewMessage),
    /// Ack or result of an earlier request, see `original_type`
    Response(ResponseFrame),
    TypingStatus(TypingStatus),
    Error(ServerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatEventKind {
    NewMessage,
    Response,
    TypingStatus,
    Error,
}

impl Event for ChatEvent {
    type Kind = ChatEventKind;

    fn kind(&self) -> ChatEventKind {
        match self {
            ChatEvent::NewMessage(_) => ChatEventKind::NewMessage,
            ChatEvent::Response(_) => ChatEventKind::Response,
            ChatEvent::TypingStatus(_) => ChatEventKind::TypingStatus,
            ChatEvent::Error(_) => ChatEventKind::Error,
        }
    }
}

/// Optional parts of an outgoing chat message
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessageOptions {
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub reply_to_id: Option<Id>,
}

struct ChatDispatcher {
    listeners: Arc<Listeners<ChatEvent>>,
}

impl FrameHandler for ChatDispatcher {
    fn handle_frame(&self, frame: RawFrame) {
        let event = match frame.frame_type.as_str() {
            "new_message" => frame.payload().map(ChatEvent::NewMessage),
            "response" => frame.payload().map(ChatEvent::Response),
            "typing_status" => frame.payload().map(ChatEvent::TypingStatus),
            "error" => frame.payload().map(ChatEvent::Error),
            other => {
                warn!("Unhandled message type: {}", other);
                return;
            }
        };

        match event {
            Ok(event) => self.listeners.emit(&event),
            Err(e) => warn!("Dropping frame: {}", e),
        }
    }
}

/// Messaging session client over `/api/ws/<user_id>`.
///
/// All outbound helpers are fire-and-forget and return whether the frame was
/// handed to the socket; nothing is queued while disconnected.
pub struct ChatClient<C: Connector = WsConnector> {
    user_id: Id,
    connection: Connection<C>,
    listeners: Arc<Listeners<ChatEvent>>,
}

impl<C: Connector> Clone for ChatClient<C> {
    fn clone(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            connection: self.connection.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<C: Connector> ChatClient<C> {
    pub fn new(base_url: &str, user_id: Id, connector: C, settings: ConnectionSettings) -> Self {
        let listeners = Arc::new(Listeners::new());
        let dispatcher = Arc::new(ChatDispatcher {
            listeners: listeners.clone(),
        });
        let connection = Connection::new(chat_url(base_url, &user_id), connector, settings, dispatcher);

        Self {
            user_id,
            connection,
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

    pub fn on<F>(&self, kind: ChatEventKind, callback: F) -> ListenerId
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
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

    pub fn send_message(
        &self,
        conversation_id: Id,
        content: &str,
        options: OutgoingMessageOptions,
    ) -> bool {
        let mut payload =
            ChatMessagePayload::new(conversation_id, content.to_string(), options.message_type);
        payload.file_url = options.file_url;
        payload.file_name = options.file_name;
        payload.file_size = options.file_size;
        payload.reply_to_id = options.reply_to_id;

        self.connection.send(&OutboundFrame::chat_message(payload))
    }

    pub fn send_typing_status(&self, is_typing: bool) -> bool {
        self.connection.send(&OutboundFrame::typing_status(is_typing))
    }

    /// Requests one page of a conversation's history
    pub fn get_history(&self, conversation_id: Id, page: u32, limit: u32) -> bool {
        self.connection
            .send(&OutboundFrame::get_history(conversation_id, page, limit))
    }

    pub fn get_online_status(&self, user_id: Id) -> bool {
        self.connection.send(&OutboundFrame::get_online_status(user_id))
    }
}
