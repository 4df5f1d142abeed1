//! HTTP provider implementations against OpenAI-compatible endpoints.
//!
//! The transcription, generation, and synthesis surfaces all follow the same
//! API family the original deployment used: `audio/transcriptions`
//! (multipart), `chat/completions` (JSON), and `audio/speech` (JSON in,
//! bytes out). Credentials and endpoints come from configuration; the
//! orchestrator wraps every call in its stage timeout.

use crate::traits::{Generator, ProviderError, Synthesizer, Transcriber, Transcript};
use async_trait::async_trait;
use ellery_types::{AudioInput, Message, ProviderKind, Role};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

/// Connection details for one provider endpoint.
#[derive(Clone, Deserialize)]
pub struct ProviderEndpoint {
    /// Base URL up to and including the API version segment,
    /// e.g. `https://api.example.com/v1`.
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
}

impl fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderEndpoint {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Whisper-style speech-to-text over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: ProviderEndpoint,
}

#[derive(Debug, Deserialize)]
struct TranscriptionBody {
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, endpoint: ProviderEndpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript, ProviderError> {
        let part = reqwest::multipart::Part::bytes(audio.data.clone())
            .file_name(format!("audio.{}", audio.format.label()));
        let form = reqwest::multipart::Form::new()
            .text("model", self.endpoint.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint.url("audio/transcriptions"))
            .bearer_auth(&self.endpoint.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                tracing::warn!(model = %self.endpoint.model, %e, "transcription request rejected");
                ProviderError::Unavailable(e.to_string())
            })?;

        let body: TranscriptionBody = response.json().await.map_err(|e| {
            tracing::warn!(model = %self.endpoint.model, %e, "undecodable transcription response");
            ProviderError::InvalidResponse(e.to_string())
        })?;

        Ok(Transcript {
            text: body.text.trim().to_string(),
            confidence: body.confidence.unwrap_or(0.0),
        })
    }
}

/// Chat-completion generation over HTTP. The same implementation serves both
/// routing slots; `kind` distinguishes the fast and accurate instances.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: ProviderEndpoint,
    kind: ProviderKind,
    system_prompt: String,
}

impl HttpGenerator {
    pub fn new(
        client: reqwest::Client,
        endpoint: ProviderEndpoint,
        kind: ProviderKind,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint,
            kind,
            system_prompt: system_prompt.into(),
        }
    }
}

/// Builds the chat-completion request body from the prompt and the session's
/// recent history. Pure so the shape is unit-testable without a server.
fn chat_body(model: &str, system_prompt: &str, prompt: &str, context: &[Message]) -> Value {
    let mut messages = Vec::with_capacity(context.len() + 2);
    messages.push(json!({ "role": "system", "content": system_prompt }));
    for message in context {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        messages.push(json!({ "role": role, "content": message.text }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));

    json!({ "model": model, "messages": messages })
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, context: &[Message]) -> Result<String, ProviderError> {
        let body = chat_body(&self.endpoint.model, &self.system_prompt, prompt, context);

        let response = self
            .client
            .post(self.endpoint.url("chat/completions"))
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                tracing::warn!(kind = ?self.kind, model = %self.endpoint.model, %e, "generation request rejected");
                ProviderError::Unavailable(e.to_string())
            })?;

        let body: ChatBody = response.json().await.map_err(|e| {
            tracing::warn!(kind = ?self.kind, model = %self.endpoint.model, %e, "undecodable generation response");
            ProviderError::InvalidResponse(e.to_string())
        })?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))?;

        Ok(content.trim().to_string())
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

/// Text-to-speech over HTTP, returning raw audio bytes.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: ProviderEndpoint,
    voice: String,
    speed: f32,
}

impl HttpSynthesizer {
    pub fn new(
        client: reqwest::Client,
        endpoint: ProviderEndpoint,
        voice: impl Into<String>,
        speed: f32,
    ) -> Self {
        Self {
            client,
            endpoint,
            voice: voice.into(),
            speed,
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let body = json!({
            "model": self.endpoint.model,
            "voice": self.voice,
            "input": text,
            "speed": self.speed,
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(self.endpoint.url("audio/speech"))
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                tracing::warn!(model = %self.endpoint.model, %e, "synthesis request rejected");
                ProviderError::Unavailable(e.to_string())
            })?;

        let bytes = response.bytes().await.map_err(|e| {
            tracing::warn!(model = %self.endpoint.model, %e, "synthesis response truncated");
            ProviderError::InvalidResponse(e.to_string())
        })?;

        if bytes.is_empty() {
            tracing::warn!(model = %self.endpoint.model, "synthesis returned no audio");
            return Err(ProviderError::InvalidResponse(
                "synthesis returned no audio".to_string(),
            ));
        }

        Ok(bytes.to_vec())
    }

    fn voice(&self) -> &str {
        &self.voice
    }

    fn model(&self) -> &str {
        &self.endpoint.model
    }

    fn speed(&self) -> f32 {
        self.speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ellery_types::MessageMeta;

    #[test]
    fn endpoint_url_joins_without_double_slash() {
        let endpoint = ProviderEndpoint {
            base_url: "https://api.example.com/v1/".to_string(),
            api_key: "k".to_string(),
            model: "m".to_string(),
        };
        assert_eq!(
            endpoint.url("chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn endpoint_debug_redacts_api_key() {
        let endpoint = ProviderEndpoint {
            base_url: "https://api.example.com/v1".to_string(),
            api_key: "secret-key".to_string(),
            model: "m".to_string(),
        };
        let debug = format!("{endpoint:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn chat_body_interleaves_history_between_system_and_prompt() {
        let context = vec![
            Message::user("first question"),
            Message::assistant("first answer", MessageMeta::default()),
        ];
        let body = chat_body("model-x", "be helpful", "second question", &context);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "second question");
        assert_eq!(body["model"], "model-x");
    }
}
