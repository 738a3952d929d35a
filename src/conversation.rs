//! On-screen transcript of the voice conversation

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::voice::{AudioAsset, Intent};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Transcribed user speech
    User,
    /// Assistant reply or inline error
    Assistant,
}

/// Processing status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Reply text known, synthesis not started
    Generating,
    /// Synthesized audio is streaming to the speaker
    Streaming,
    /// Finished
    Done,
    /// Failed; text describes the problem or the reply never finished
    Error,
}

/// One turn in the transcript
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    /// Stable identifier used for in-place updates
    pub id: Uuid,
    /// Author
    pub role: Role,
    /// Display text
    pub text: String,
    /// Classified intent (assistant replies only)
    pub intent: Option<Intent>,
    /// Synthesized reply audio, attached once streaming completes
    pub audio: Option<Arc<AudioAsset>>,
    /// Processing status
    pub status: MessageStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Transcript plus the capture-level error banner
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    banner: Option<String>,
}

/// Conversation shared between the pipeline worker and the host
pub type SharedConversation = Arc<Mutex<Conversation>>;

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty conversation behind a shared handle
    #[must_use]
    pub fn shared() -> SharedConversation {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Append a user message
    pub fn push_user(&mut self, text: &str) -> Uuid {
        self.push(Role::User, text, None, MessageStatus::Done)
    }

    /// Append an assistant reply awaiting synthesis
    pub fn push_reply(&mut self, text: &str, intent: Intent) -> Uuid {
        self.push(Role::Assistant, text, Some(intent), MessageStatus::Generating)
    }

    /// Append an inline error message
    pub fn push_error(&mut self, error: &str) -> Uuid {
        self.push(
            Role::Assistant,
            &format!("⚠️ 오류: {error}"),
            None,
            MessageStatus::Error,
        )
    }

    fn push(
        &mut self,
        role: Role,
        text: &str,
        intent: Option<Intent>,
        status: MessageStatus,
    ) -> Uuid {
        let id = Uuid::new_v4();
        tracing::info!(%id, ?role, ?status, text, "message");
        self.messages.push(ConversationMessage {
            id,
            role,
            text: text.to_string(),
            intent,
            audio: None,
            status,
            created_at: Utc::now(),
        });
        id
    }

    /// Update a message's status, returning false if it does not exist
    pub fn set_status(&mut self, id: Uuid, status: MessageStatus) -> bool {
        self.get_mut(id).is_some_and(|m| {
            m.status = status;
            tracing::debug!(%id, ?status, "message status");
            true
        })
    }

    /// Attach finished audio and mark the message done
    pub fn attach_audio(&mut self, id: Uuid, audio: AudioAsset) -> bool {
        self.get_mut(id).is_some_and(|m| {
            tracing::debug!(%id, bytes = audio.bytes.len(), "audio attached");
            m.audio = Some(Arc::new(audio));
            m.status = MessageStatus::Done;
            true
        })
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut ConversationMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Look up a message
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// All messages in order
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Show a capture-level error
    pub fn set_banner(&mut self, error: impl Into<String>) {
        let error = error.into();
        if self.banner.as_deref() != Some(error.as_str()) {
            tracing::warn!(error = %error, "error banner");
        }
        self.banner = Some(error);
    }

    /// Current error banner
    #[must_use]
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Drop all messages and release their audio
    pub fn clear(&mut self) {
        let released = self.messages.iter().filter(|m| m.audio.is_some()).count();
        self.messages.clear();
        self.banner = None;
        tracing::debug!(released, "conversation cleared");
    }
}
