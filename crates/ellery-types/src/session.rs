//! Session and message data model.
//!
//! A `Session` is the lifetime of one client's connected conversation. It is
//! owned by the session transport, holds the ordered message history used as
//! generation context, and is destroyed on disconnect timeout. Messages are
//! immutable once created.

use crate::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Optional per-message metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    /// Transcription confidence for user turns; generation confidence for
    /// assistant turns, where the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Time spent producing this message, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    /// Which backend produced an assistant message. `Fallback` here is the
    /// only way a client can tell a degraded turn from a normal one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

/// One turn entry in a session's history. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub text: String,
    /// Opaque reference to synthesized audio for this message, if any.
    /// The audio bytes themselves are delivered once and not retained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    /// Creates a user message with no metadata beyond the transcript.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: Role::User,
            text: text.into(),
            audio_ref: None,
            meta: MessageMeta::default(),
        }
    }

    /// Creates an assistant message carrying turn metadata.
    pub fn assistant(text: impl Into<String>, meta: MessageMeta) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: Role::Assistant,
            text: text.into(),
            audio_ref: None,
            meta,
        }
    }
}

/// Connection lifecycle states for the session transport.
///
/// Transitions are the only mutation path; no external writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    /// Reconnect attempts exhausted; only an explicit force-reconnect leaves
    /// this state.
    Failed,
}

/// Client-side recording state machine states, one per capture controller.
///
/// Mutated only by controller methods in response to user action or server
/// status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

/// One client's connected conversation. Connection state lives with the
/// transport that owns the socket, not here.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Appends a message to the history. Messages are never edited or removed.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The ordered message history, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns up to the last `n` messages, for use as generation context.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}
