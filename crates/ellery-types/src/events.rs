//! WebSocket event envelopes for the session transport.
//!
//! The wire protocol is JSON text frames in both directions, tagged unions
//! keyed on `type` with camelCase field names to match the frontend frame
//! types. Audio payloads travel base64-encoded inside the envelope.

use crate::audio::AudioFormat;
use crate::session::VoiceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frames sent client → server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// One captured utterance: base64 audio plus its declared format.
    #[serde(rename = "voice-input")]
    VoiceInput {
        /// Base64-encoded audio bytes.
        audio: String,
        format: AudioFormat,
        #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// A plain text turn (degraded mode sends these over HTTP instead, but
    /// the frame exists for clients that stay on the socket).
    #[serde(rename = "text-input")]
    TextInput { text: String },
}

/// Frames sent server → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Intermediate progress at a pipeline stage boundary.
    #[serde(rename = "status")]
    Status { state: VoiceState, message: String },
    /// The terminal success event for a turn. Exactly one terminal event
    /// (`ai-response` or `error`) is emitted per input.
    #[serde(rename = "ai-response")]
    AiResponse(AiResponsePayload),
    /// The terminal failure event for a turn.
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// Payload of the `ai-response` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponsePayload {
    pub text: String,
    /// Base64-encoded synthesized speech.
    pub audio_buffer: String,
    pub confidence: f32,
    /// Total processing time in milliseconds.
    pub processing_time: u64,
    pub provider: crate::ProviderKind,
}

/// Payload of the `error` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Stable machine-readable code (e.g. `invalid_audio`, `provider_timeout`).
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

/// Connection lifecycle notices surfaced to transport subscribers.
///
/// These are local observations of the client transport's state machine, not
/// wire frames; every `ConnectionState` transition emits one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportNotice {
    Connected,
    Disconnected { reason: String },
    ReconnectAttempt { attempt: u32 },
    Reconnected { attempt: u32 },
    ReconnectFailed,
}
