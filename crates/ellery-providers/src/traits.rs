//! Async provider seams.

use async_trait::async_trait;
use ellery_types::{AudioInput, Message, ProviderKind};
use thiserror::Error;

/// Failures from an upstream provider call.
///
/// The orchestrator converts these into fallback-chain steps at the stage
/// boundary; they never cross it raw.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http request failed: {0}")]
    Http(String),

    #[error("provider returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// A speech-to-text result.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// Confidence in `[0, 1]`; providers that report none get 0.0.
    pub confidence: f32,
}

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript, ProviderError>;
}

/// Language-generation collaborator. Two are injected into the orchestrator:
/// one [`ProviderKind::Fast`] and one [`ProviderKind::Accurate`].
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &[Message]) -> Result<String, ProviderError>;

    /// Which routing slot this backend fills.
    fn kind(&self) -> ProviderKind;
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;

    /// Voice identifier, folded into audio cache keys.
    fn voice(&self) -> &str;

    /// Synthesis model identifier, folded into audio cache keys so a model
    /// change never serves audio rendered by the old one.
    fn model(&self) -> &str;

    /// Speech speed multiplier, folded into audio cache keys.
    fn speed(&self) -> f32;
}
