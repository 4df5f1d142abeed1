//! Audio payload types exchanged between capture, transport, and providers.

use crate::ProviderKind;
use serde::{Deserialize, Serialize};

/// Maximum accepted audio payload size (10 MiB). Prevents OOM from oversized
/// uploads; inputs beyond this are rejected as invalid before any provider call.
pub const MAX_AUDIO_BYTES: usize = 10 * 1024 * 1024;

/// Audio container formats accepted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    M4a,
    Ogg,
}

impl AudioFormat {
    /// Returns the lowercase file-extension label for this format.
    pub fn label(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Ogg => "ogg",
        }
    }

    /// Parses a format from a lowercase extension label.
    ///
    /// Returns `None` for unsupported formats.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "m4a" => Some(Self::M4a),
            "ogg" => Some(Self::Ogg),
            _ => None,
        }
    }
}

/// One captured user utterance, as handed to the orchestrator.
///
/// Ephemeral: exists only for the duration of one orchestration request and
/// is never persisted.
#[derive(Debug, Clone)]
pub struct AudioInput {
    /// Raw audio bytes in the declared container format.
    pub data: Vec<u8>,
    /// Declared container format.
    pub format: AudioFormat,
    /// Approximate capture duration, when the capture side knows it.
    pub duration_ms: Option<u64>,
}

impl AudioInput {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            data,
            format,
            duration_ms: None,
        }
    }

    /// True when the payload carries no audio bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The bundled result of one assistant turn: generated text plus synthesized
/// speech. Ownership transfers to the transport for delivery, then the value
/// is discarded.
#[derive(Debug, Clone)]
pub struct AudioResponse {
    /// The assistant's generated reply text.
    pub text: String,
    /// Synthesized speech for `text`.
    pub audio: Vec<u8>,
    /// Confidence score for the turn (transcription confidence where known).
    pub confidence: f32,
    /// End-to-end processing time for the turn, in milliseconds.
    pub processing_time_ms: u64,
    /// Which backend produced the reply.
    pub provider: ProviderKind,
}
