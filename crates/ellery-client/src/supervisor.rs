//! Degradation supervisor: voice mode with a text-mode escape hatch.
//!
//! The supervisor owns the active input path as a tagged variant. When the
//! capture controller or transport reports an unrecoverable fault, the fault
//! stops here: the voice pipeline is dropped (releasing its device), the
//! message history survives, and the session continues over a plain
//! request/reply text channel. Returning to voice is an explicit user action,
//! never automatic, so a flapping device cannot cause a retry loop.

use ellery_types::{CaptureError, Message, TransportError};
use serde::{Deserialize, Serialize};

/// The fault classes that trigger degradation.
#[derive(Debug)]
pub enum PipelineFault {
    Capture(CaptureError),
    Transport(TransportError),
}

impl std::fmt::Display for PipelineFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineFault::Capture(error) => write!(f, "capture fault: {error}"),
            PipelineFault::Transport(error) => write!(f, "transport fault: {error}"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextRequest<'a> {
    message: &'a str,
    session_id: &'a str,
}

/// Reply from the text-submit endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReply {
    pub response: String,
    /// Server-side processing time in milliseconds.
    pub processing_time: u64,
}

/// Plain request/reply path used while degraded.
#[derive(Debug, Clone)]
pub struct TextChannel {
    client: reqwest::Client,
    endpoint: String,
}

impl TextChannel {
    /// `endpoint` is the full URL of the text-submit route.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub async fn send(&self, session_id: &str, message: &str) -> Result<TextReply, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&TextRequest {
                message,
                session_id,
            })
            .send()
            .await
            .map_err(|_| TransportError::NotConnected)?
            .error_for_status()
            .map_err(|_| TransportError::NotConnected)?;

        response.json().await.map_err(|_| TransportError::Timeout)
    }
}

/// The active input path.
pub enum InputMode<V> {
    Voice(V),
    Text(TextChannel),
}

/// Wraps the fallible voice pipeline and owns the mode switch.
///
/// Generic over the voice pipeline type so tests can drive the supervisor
/// with a stand-in; in the client binary `V` bundles the capture controller
/// and transport.
pub struct DegradationSupervisor<V> {
    session_id: String,
    mode: InputMode<V>,
    history: Vec<Message>,
    text_channel: TextChannel,
}

impl<V> DegradationSupervisor<V> {
    /// Starts in voice mode. `text_channel` is held ready so degradation
    /// needs no construction that could itself fail.
    pub fn new(session_id: impl Into<String>, voice: V, text_channel: TextChannel) -> Self {
        Self {
            session_id: session_id.into(),
            mode: InputMode::Voice(voice),
            history: Vec::new(),
            text_channel,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mode(&self) -> &InputMode<V> {
        &self.mode
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.mode, InputMode::Text(_))
    }

    /// Conversation history, preserved across mode switches.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn record(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Fault boundary. Suppresses the fault, drops the voice pipeline, and
    /// switches to the text channel. Idempotent while already degraded.
    pub fn on_fault(&mut self, fault: PipelineFault) {
        if self.is_degraded() {
            tracing::debug!(%fault, "fault while already degraded, ignoring");
            return;
        }
        tracing::warn!(%fault, "voice pipeline fault, degrading to text mode");
        self.mode = InputMode::Text(self.text_channel.clone());
    }

    /// Explicit return to voice mode with a freshly built pipeline. The
    /// caller constructs `voice` anew; a pipeline that failed once is never
    /// reused.
    pub fn restore_voice(&mut self, voice: V) {
        self.mode = InputMode::Voice(voice);
    }

    /// Sends a message over the text channel. Only meaningful while
    /// degraded; in voice mode the transport carries input instead.
    pub async fn send_text(&mut self, message: &str) -> Result<TextReply, TransportError> {
        let channel = match &self.mode {
            InputMode::Text(channel) => channel.clone(),
            InputMode::Voice(_) => return Err(TransportError::NotConnected),
        };
        let reply = channel.send(&self.session_id, message).await?;
        self.history.push(Message::user(message));
        self.history.push(Message::assistant(
            reply.response.clone(),
            ellery_types::MessageMeta {
                confidence: None,
                processing_time_ms: Some(reply.processing_time),
                provider: None,
            },
        ));
        Ok(reply)
    }
}
