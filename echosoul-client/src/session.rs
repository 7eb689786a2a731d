use crate::ai::AiEvent;
use echosoul_proto::{now_timestamp, AiCharacter, HistoryMessage, Id};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Ai,
}

impl Role {
    fn from_wire(role: Option<&str>) -> Self {
        match role {
            Some("ai") | Some("assistant") => Role::Ai,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    /// None until the server acknowledges a locally recorded message
    pub message_id: Option<Id>,
    pub role: Role,
    pub content: String,
    pub timestamp: Option<String>,
}

impl From<&HistoryMessage> for TranscriptEntry {
    fn from(msg: &HistoryMessage) -> Self {
        Self {
            message_id: msg.id.clone(),
            role: Role::from_wire(msg.role.as_deref()),
            content: msg.content.clone(),
            timestamp: msg.timestamp.clone(),
        }
    }
}

/// Text of the AI reply currently being streamed
#[derive(Debug, Clone, PartialEq)]
pub struct StreamAccumulator {
    pub message_id: Id,
    pub text: String,
    pub streaming: bool,
}

/// What changed after applying an event
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    SessionStarted {
        character: Option<AiCharacter>,
        conversation_id: Option<Id>,
    },
    StreamStarted(Id),
    /// `text` is only the newly appended chunk
    StreamAppended { message_id: Id, text: String },
    StreamFinished(TranscriptEntry),
    UserMessageConfirmed(TranscriptEntry),
    HistoryLoaded(usize),
    CharactersLoaded(usize),
    Error(String),
}

/// Consumer-side state of one AI conversation, fed every `AiEvent`
#[derive(Debug, Clone, Default)]
pub struct AiSessionState {
    character: Option<AiCharacter>,
    conversation_id: Option<Id>,
    stream: Option<StreamAccumulator>,
    transcript: Vec<TranscriptEntry>,
    characters: Vec<AiCharacter>,
    last_error: Option<String>,
    history_requested: bool,
}

impl AiSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &AiEvent) -> Option<SessionUpdate> {
        match event {
            AiEvent::ConnectionEstablished(greeting) => {
                debug!("Server greeting: {:?}", greeting.message);
                None
            }
            AiEvent::SessionStarted(confirmation) => {
                if !confirmation.success {
                    let reason = confirmation
                        .message
                        .clone()
                        .unwrap_or_else(|| "failed to start AI session".to_string());
                    self.last_error = Some(reason.clone());
                    return Some(SessionUpdate::Error(reason));
                }

                let same_conversation = confirmation.conversation_id == self.conversation_id;
                let same_character = confirmation.character.is_none()
                    || confirmation.character == self.character;
                if same_conversation && same_character {
                    debug!("Session already confirmed ({:?})", confirmation.source);
                    return None;
                }

                if !same_conversation {
                    self.transcript.clear();
                    self.stream = None;
                    self.history_requested = false;
                    self.conversation_id = confirmation.conversation_id.clone();
                }
                if confirmation.character.is_some() {
                    self.character = confirmation.character.clone();
                }
                self.last_error = None;

                Some(SessionUpdate::SessionStarted {
                    character: self.character.clone(),
                    conversation_id: self.conversation_id.clone(),
                })
            }
            AiEvent::UserMessageSent(sent) => {
                let content = sent.content.clone().unwrap_or_default();
                let pending = self.transcript.iter_mut().rev().find(|entry| {
                    entry.role == Role::User && entry.message_id.is_none() && entry.content == content
                });

                let entry = match pending {
                    Some(entry) => {
                        entry.message_id = sent.message_id.clone();
                        if sent.timestamp.is_some() {
                            entry.timestamp = sent.timestamp.clone();
                        }
                        entry.clone()
                    }
                    None => {
                        let entry = TranscriptEntry {
                            message_id: sent.message_id.clone(),
                            role: Role::User,
                            content,
                            timestamp: sent.timestamp.clone(),
                        };
                        self.transcript.push(entry.clone());
                        entry
                    }
                };
                Some(SessionUpdate::UserMessageConfirmed(entry))
            }
            AiEvent::StreamStart(start) => {
                if let Some(previous) = &self.stream {
                    if previous.streaming {
                        warn!(
                            "Stream {} replaced by {} before it ended",
                            previous.message_id, start.message_id
                        );
                    }
                }
                self.stream = Some(StreamAccumulator {
                    message_id: start.message_id.clone(),
                    text: String::new(),
                    streaming: true,
                });
                Some(SessionUpdate::StreamStarted(start.message_id.clone()))
            }
            AiEvent::StreamChunk(chunk) => match &mut self.stream {
                Some(stream) if stream.streaming && stream.message_id == chunk.message_id => {
                    stream.text.push_str(&chunk.chunk);
                    Some(SessionUpdate::StreamAppended {
                        message_id: chunk.message_id.clone(),
                        text: chunk.chunk.clone(),
                    })
                }
                _ => {
                    debug!("Dropping chunk for inactive stream {}", chunk.message_id);
                    None
                }
            },
            AiEvent::StreamEnd(end) => {
                let tracked = matches!(&self.stream, Some(s) if s.message_id == end.message_id);
                if !tracked {
                    debug!("Ignoring end of untracked stream {}", end.message_id);
                    return None;
                }

                let stream = self.stream.take()?;
                let content = if end.final_content.is_empty() {
                    stream.text
                } else {
                    end.final_content.clone()
                };
                let entry = TranscriptEntry {
                    message_id: Some(end.message_id.clone()),
                    role: Role::Ai,
                    content,
                    timestamp: end.timestamp.clone(),
                };
                self.transcript.push(entry.clone());
                Some(SessionUpdate::StreamFinished(entry))
            }
            AiEvent::AiError(error) => {
                let text = error.text().to_string();
                if let (Some(id), Some(stream)) = (&error.message_id, &self.stream) {
                    if *id == stream.message_id {
                        self.stream = None;
                    }
                }
                self.last_error = Some(text.clone());
                Some(SessionUpdate::Error(text))
            }
            AiEvent::Response(_) => None,
            AiEvent::ConversationHistory(history) => {
                if history.conversation_id.is_some()
                    && self.conversation_id.is_some()
                    && history.conversation_id != self.conversation_id
                {
                    debug!("Ignoring history of another conversation");
                    return None;
                }
                self.transcript = history.messages.iter().map(TranscriptEntry::from).collect();
                self.history_requested = true;
                Some(SessionUpdate::HistoryLoaded(self.transcript.len()))
            }
            AiEvent::AiCharacters(list) => {
                self.characters = list.characters.clone();
                Some(SessionUpdate::CharactersLoaded(self.characters.len()))
            }
        }
    }

    /// Adds a message the user just sent; the server ack fills in its id
    pub fn record_outgoing(&mut self, content: &str) {
        self.transcript.push(TranscriptEntry {
            message_id: None,
            role: Role::User,
            content: content.to_string(),
            timestamp: Some(now_timestamp()),
        });
    }

    pub fn end_session(&mut self) {
        self.character = None;
        self.conversation_id = None;
        self.stream = None;
        self.history_requested = false;
    }

    /// True once per conversation, until history has been requested
    pub fn needs_history_bootstrap(&self) -> bool {
        self.conversation_id.is_some() && !self.history_requested
    }

    pub fn mark_history_requested(&mut self) {
        self.history_requested = true;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn character(&self) -> Option<&AiCharacter> {
        self.character.as_ref()
    }

    pub fn conversation_id(&self) -> Option<&Id> {
        self.conversation_id.as_ref()
    }

    pub fn stream(&self) -> Option<&StreamAccumulator> {
        self.stream.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.streaming)
    }

    /// Text accumulated so far for the reply in progress
    pub fn streaming_text(&self) -> Option<&str> {
        self.stream
            .as_ref()
            .filter(|s| s.streaming)
            .map(|s| s.text.as_str())
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn characters(&self) -> &[AiCharacter] {
        &self.characters
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ConfirmationSource, SessionConfirmation};
    use echosoul_proto::{
        AiCharacters, AiErrorFrame, ConversationHistory, StreamChunk, StreamEnd, StreamStart,
        UserMessageSent,
    };

    fn luna() -> AiCharacter {
        serde_json::from_value(serde_json::json!({ "id": "char_001", "name": "Luna" })).unwrap()
    }

    fn confirmed(source: ConfirmationSource, conversation: &str) -> AiEvent {
        AiEvent::SessionStarted(SessionConfirmation {
            source,
            success: true,
            character: Some(luna()),
            conversation_id: Some(Id::from(conversation)),
            message: None,
        })
    }

    fn start(id: &str) -> AiEvent {
        AiEvent::StreamStart(StreamStart {
            message_id: Id::from(id),
            conversation_id: None,
        })
    }

    fn chunk(id: &str, text: &str) -> AiEvent {
        AiEvent::StreamChunk(StreamChunk {
            message_id: Id::from(id),
            chunk: text.to_string(),
            timestamp: None,
        })
    }

    fn end(id: &str, final_content: &str) -> AiEvent {
        AiEvent::StreamEnd(StreamEnd {
            message_id: Id::from(id),
            final_content: final_content.to_string(),
            timestamp: None,
        })
    }

    #[test]
    fn test_chunks_only_extend_the_active_stream() {
        let mut state = AiSessionState::new();

        assert_eq!(state.apply(&chunk("m1", "early")), None);

        state.apply(&start("m1"));
        state.apply(&chunk("m1", "Hi"));
        assert_eq!(state.apply(&chunk("m2", "??")), None);
        assert_eq!(
            state.apply(&chunk("m1", " there")),
            Some(SessionUpdate::StreamAppended {
                message_id: Id::from("m1"),
                text: " there".to_string()
            })
        );

        assert_eq!(state.streaming_text(), Some("Hi there"));
    }

    #[test]
    fn test_stream_end_prefers_final_content() {
        let mut state = AiSessionState::new();
        state.apply(&start("m1"));
        state.apply(&chunk("m1", "Hi"));

        let update = state.apply(&end("m1", "Hi there, friend"));

        match update {
            Some(SessionUpdate::StreamFinished(entry)) => {
                assert_eq!(entry.content, "Hi there, friend");
                assert_eq!(entry.role, Role::Ai);
            }
            other => panic!("expected finished stream, got {:?}", other),
        }
        assert!(state.stream().is_none());
        assert!(!state.is_streaming());
    }

    #[test]
    fn test_stream_end_falls_back_to_accumulated_text() {
        let mut state = AiSessionState::new();
        state.apply(&start("m1"));
        state.apply(&chunk("m1", "Hi"));
        state.apply(&chunk("m1", " there"));

        state.apply(&end("m1", ""));

        assert_eq!(state.transcript()[0].content, "Hi there");
    }

    #[test]
    fn test_end_of_untracked_stream_is_ignored() {
        let mut state = AiSessionState::new();
        state.apply(&start("m1"));
        state.apply(&chunk("m1", "Hi"));

        assert_eq!(state.apply(&end("m9", "other")), None);

        assert!(state.transcript().is_empty());
        assert_eq!(state.streaming_text(), Some("Hi"));
    }

    #[test]
    fn test_new_stream_replaces_unfinished_one() {
        let mut state = AiSessionState::new();
        state.apply(&start("m1"));
        state.apply(&chunk("m1", "abandoned"));
        state.apply(&start("m2"));

        assert_eq!(state.apply(&chunk("m1", "late")), None);
        state.apply(&chunk("m2", "fresh"));

        assert_eq!(state.streaming_text(), Some("fresh"));
    }

    #[test]
    fn test_duplicate_confirmation_is_noop() {
        let mut state = AiSessionState::new();

        let first = state.apply(&confirmed(ConfirmationSource::Dedicated, "conv_42"));
        let second = state.apply(&confirmed(ConfirmationSource::Response, "conv_42"));

        assert_eq!(
            first,
            Some(SessionUpdate::SessionStarted {
                character: Some(luna()),
                conversation_id: Some(Id::from("conv_42")),
            })
        );
        assert_eq!(second, None);
        assert_eq!(state.conversation_id(), Some(&Id::from("conv_42")));
        assert_eq!(state.character().unwrap().name, "Luna");
    }

    #[test]
    fn test_failed_confirmation_records_error() {
        let mut state = AiSessionState::new();

        let update = state.apply(&AiEvent::SessionStarted(SessionConfirmation {
            source: ConfirmationSource::Response,
            success: false,
            character: None,
            conversation_id: None,
            message: Some("character not found".to_string()),
        }));

        assert_eq!(
            update,
            Some(SessionUpdate::Error("character not found".to_string()))
        );
        assert_eq!(state.last_error(), Some("character not found"));
        assert!(state.conversation_id().is_none());
    }

    #[test]
    fn test_history_bootstrap_once_per_conversation() {
        let mut state = AiSessionState::new();
        assert!(!state.needs_history_bootstrap());

        state.apply(&confirmed(ConfirmationSource::Dedicated, "conv_42"));
        assert!(state.needs_history_bootstrap());

        state.mark_history_requested();
        assert!(!state.needs_history_bootstrap());

        state.apply(&confirmed(ConfirmationSource::Dedicated, "conv_43"));
        assert!(state.needs_history_bootstrap());
    }

    #[test]
    fn test_history_replaces_transcript() {
        let mut state = AiSessionState::new();
        state.apply(&confirmed(ConfirmationSource::Dedicated, "conv_42"));

        let history: ConversationHistory = serde_json::from_value(serde_json::json!({
            "conversation_id": "conv_42",
            "messages": [
                { "id": 1, "role": "user", "content": "hello" },
                { "message_id": 2, "sender_type": "ai", "content": "Hi there" }
            ]
        }))
        .unwrap();

        assert_eq!(
            state.apply(&AiEvent::ConversationHistory(history)),
            Some(SessionUpdate::HistoryLoaded(2))
        );
        assert_eq!(state.transcript()[0].role, Role::User);
        assert_eq!(state.transcript()[1].role, Role::Ai);
        assert!(!state.needs_history_bootstrap());

        let other = ConversationHistory {
            conversation_id: Some(Id::from("conv_99")),
            messages: Vec::new(),
        };
        assert_eq!(state.apply(&AiEvent::ConversationHistory(other)), None);
        assert_eq!(state.transcript().len(), 2);
    }

    #[test]
    fn test_ack_fills_in_recorded_message() {
        let mut state = AiSessionState::new();
        state.record_outgoing("hello");

        let update = state.apply(&AiEvent::UserMessageSent(UserMessageSent {
            message_id: Some(Id::Num(501)),
            conversation_id: Some(Id::from("conv_42")),
            content: Some("hello".to_string()),
            timestamp: None,
        }));

        assert!(matches!(update, Some(SessionUpdate::UserMessageConfirmed(_))));
        assert_eq!(state.transcript().len(), 1);
        assert_eq!(state.transcript()[0].message_id, Some(Id::Num(501)));
        assert!(state.transcript()[0].timestamp.is_some());
    }

    #[test]
    fn test_error_for_active_stream_drops_it() {
        let mut state = AiSessionState::new();
        state.apply(&start("m1"));
        state.apply(&chunk("m1", "Hi"));

        let error: AiErrorFrame = serde_json::from_value(serde_json::json!({
            "error": "model overloaded",
            "message_id": "m1"
        }))
        .unwrap();
        state.apply(&AiEvent::AiError(error));

        assert!(state.stream().is_none());
        assert_eq!(state.last_error(), Some("model overloaded"));
    }

    #[test]
    fn test_end_session_and_reset() {
        let mut state = AiSessionState::new();
        state.apply(&confirmed(ConfirmationSource::Dedicated, "conv_42"));
        state.apply(&AiEvent::AiCharacters(AiCharacters {
            characters: vec![luna()],
        }));
        state.apply(&start("m1"));

        state.end_session();
        assert!(state.character().is_none());
        assert!(state.conversation_id().is_none());
        assert!(state.stream().is_none());
        assert_eq!(state.characters().len(), 1);

        state.record_outgoing("bye");
        state.reset();
        assert!(state.transcript().is_empty());
        assert!(state.characters().is_empty());
    }
}
