use crate::breaker::CircuitBreaker;
use crate::config::OrchestratorConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ellery_cache::{Fingerprint, ResponseCache};
use ellery_classify::Classifier;
use ellery_providers::{
    FallbackContext, FallbackService, Generator, Synthesizer, Transcriber, Transcript,
};
use ellery_types::{
    AiResponsePayload, AudioInput, ComplexityClass, ErrorPayload, Message, MessageMeta,
    OrchestrationError, ProviderKind, ServerFrame, Session, VoiceState, MAX_AUDIO_BYTES,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

/// Where a turn's frames go. Implementations look up the session's current
/// socket at delivery time; a sink whose client is gone drops the frame, so
/// a disconnect mid-turn costs nothing but the delivery.
pub trait EventSink: Send + Sync {
    fn deliver(&self, frame: ServerFrame);
}

/// The injected upstream seams.
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub fast: Arc<dyn Generator>,
    pub accurate: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub classifier: Arc<dyn Classifier>,
}

/// Result of a text-mode turn, returned to the HTTP handler rather than
/// emitted as frames.
#[derive(Debug, Clone, PartialEq)]
pub struct TextTurn {
    pub response: String,
    pub processing_time_ms: u64,
    pub provider: ProviderKind,
}

/// Generated reply text plus which backend produced it. Cached as a unit so
/// cache hits keep honest provider metadata.
#[derive(Debug, Clone)]
struct GeneratedReply {
    text: String,
    provider: ProviderKind,
}

/// Per-session mutable state. The history mutex serializes context reads and
/// appends; the semaphore caps in-flight turns for this session alone.
struct SessionSlot {
    history: Mutex<Session>,
    permits: Semaphore,
}

pub struct Orchestrator {
    transcriber: Arc<dyn Transcriber>,
    fast: Arc<dyn Generator>,
    accurate: Arc<dyn Generator>,
    fast_breaker: CircuitBreaker,
    accurate_breaker: CircuitBreaker,
    synthesizer: Arc<dyn Synthesizer>,
    classifier: Arc<dyn Classifier>,
    fallback: FallbackService,
    stt_cache: ResponseCache<Transcript>,
    text_cache: ResponseCache<GeneratedReply>,
    audio_cache: ResponseCache<Vec<u8>>,
    sessions: Mutex<HashMap<String, Arc<SessionSlot>>>,
    global_permits: Semaphore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        fallback: FallbackService,
        config: OrchestratorConfig,
    ) -> Self {
        let recovery = Duration::from_secs(config.breaker_recovery_secs);
        Self {
            transcriber: collaborators.transcriber,
            fast: collaborators.fast,
            accurate: collaborators.accurate,
            fast_breaker: CircuitBreaker::new(config.breaker_failure_threshold, recovery),
            accurate_breaker: CircuitBreaker::new(config.breaker_failure_threshold, recovery),
            synthesizer: collaborators.synthesizer,
            classifier: collaborators.classifier,
            fallback,
            stt_cache: ResponseCache::new(),
            text_cache: ResponseCache::new(),
            audio_cache: ResponseCache::new(),
            sessions: Mutex::new(HashMap::new()),
            global_permits: Semaphore::new(config.max_concurrent_turns),
            config,
        }
    }

    /// Runs the full voice pipeline for one utterance. Emits status frames at
    /// stage boundaries and exactly one terminal frame (`ai-response` or
    /// `error`) through `sink`.
    pub async fn handle_voice_input(
        &self,
        session_id: &str,
        audio: AudioInput,
        sink: &dyn EventSink,
    ) {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if audio.is_empty() {
            self.deliver_error(
                sink,
                &request_id,
                &OrchestrationError::InvalidAudio("audio payload is empty".to_string()),
            );
            return;
        }
        if audio.data.len() > MAX_AUDIO_BYTES {
            self.deliver_error(
                sink,
                &request_id,
                &OrchestrationError::InvalidAudio(
                    "audio payload exceeds the size ceiling".to_string(),
                ),
            );
            return;
        }

        let slot = self.session_slot(session_id).await;
        let _permits = match self.acquire_permits(&slot).await {
            Some(permits) => permits,
            None => {
                tracing::warn!(session_id = %session_id, "no capacity for turn, shedding to fallback");
                let canned = self.fallback.fallback_response(FallbackContext::Capacity);
                self.finish_turn(&slot, sink, None, canned.text, canned.audio, 0.0, started)
                    .await;
                return;
            }
        };

        self.status(sink, "transcribing");
        let transcript = match self.transcribe(&audio).await {
            Some(transcript) => transcript,
            None => {
                let canned = self.fallback.fallback_response(FallbackContext::Transcription);
                self.finish_turn(&slot, sink, None, canned.text, canned.audio, 0.0, started)
                    .await;
                return;
            }
        };

        let (class, context) = {
            let session = slot.history.lock().await;
            let context = session.recent(self.config.history_depth).to_vec();
            let class = self.classifier.classify(&transcript.text, &context);
            (class, context)
        };
        tracing::debug!(
            session_id = %session_id,
            class = class.label(),
            "classified transcript"
        );

        self.status(sink, "generating");
        let reply = self.generate_reply(&transcript.text, &context, class).await;

        self.status(sink, "synthesizing");
        let (audio_bytes, provider) = if reply.provider == ProviderKind::Fallback {
            // The canned response carries its own audio cue.
            let canned = self.fallback.fallback_response(FallbackContext::Generation);
            (canned.audio, ProviderKind::Fallback)
        } else {
            match self.synthesize(&reply.text).await {
                Some(bytes) => (bytes, reply.provider),
                None => {
                    // Keep the generated answer; only the speech is degraded.
                    let canned = self.fallback.fallback_response(FallbackContext::Synthesis);
                    (canned.audio, ProviderKind::Fallback)
                }
            }
        };

        self.finish_turn(
            &slot,
            sink,
            Some((transcript.text, provider)),
            reply.text,
            audio_bytes,
            transcript.confidence,
            started,
        )
        .await;
        tracing::info!(
            session_id = %session_id,
            request_id = %request_id,
            provider = ?provider,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "voice turn complete"
        );
    }

    /// The degraded-mode pipeline: same classification, routing, caching, and
    /// fallback chain, minus capture and synthesis. Never fails; capacity and
    /// provider outages resolve to canned text.
    pub async fn handle_text_input(&self, session_id: &str, text: &str) -> TextTurn {
        let started = Instant::now();
        let slot = self.session_slot(session_id).await;

        let _permits = match self.acquire_permits(&slot).await {
            Some(permits) => permits,
            None => {
                let canned = self.fallback.fallback_response(FallbackContext::Capacity);
                return TextTurn {
                    response: canned.text,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    provider: ProviderKind::Fallback,
                };
            }
        };

        let (class, context) = {
            let session = slot.history.lock().await;
            let context = session.recent(self.config.history_depth).to_vec();
            let class = self.classifier.classify(text, &context);
            (class, context)
        };

        let reply = self.generate_reply(text, &context, class).await;
        let elapsed = started.elapsed().as_millis() as u64;

        {
            let mut session = slot.history.lock().await;
            session.push(Message::user(text));
            session.push(Message::assistant(
                reply.text.clone(),
                MessageMeta {
                    confidence: None,
                    processing_time_ms: Some(elapsed),
                    provider: Some(reply.provider),
                },
            ));
        }

        TextTurn {
            response: reply.text,
            processing_time_ms: elapsed,
            provider: reply.provider,
        }
    }

    /// Message history for one session, oldest first. Empty for unknown ids.
    pub async fn session_messages(&self, session_id: &str) -> Vec<Message> {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(slot) => slot.history.lock().await.messages().to_vec(),
            None => Vec::new(),
        }
    }

    /// Drops a session's history and permits. Called by the transport when
    /// the disconnect timeout elapses without a reconnect.
    pub async fn remove_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(session_id).is_some() {
            tracing::debug!(session_id = %session_id, "session state removed");
        }
    }

    async fn session_slot(&self, session_id: &str) -> Arc<SessionSlot> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(SessionSlot {
                    history: Mutex::new(Session::new(session_id)),
                    permits: Semaphore::new(self.config.max_turns_per_session),
                })
            })
            .clone()
    }

    /// Acquires the global then the per-session permit, each within the grace
    /// period. `None` means the turn should be shed, not queued.
    async fn acquire_permits<'a>(
        &'a self,
        slot: &'a SessionSlot,
    ) -> Option<(
        tokio::sync::SemaphorePermit<'a>,
        tokio::sync::SemaphorePermit<'a>,
    )> {
        let grace = Duration::from_millis(self.config.permit_grace_ms);
        let global = match timeout(grace, self.global_permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return None,
        };
        let local = match timeout(grace, slot.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return None,
        };
        Some((global, local))
    }

    async fn transcribe(&self, audio: &AudioInput) -> Option<Transcript> {
        let fingerprint = Fingerprint::of_bytes("stt", &audio.data);
        if let Some(hit) = self.stt_cache.get(&fingerprint) {
            tracing::debug!("transcription cache hit");
            return Some(hit);
        }

        let budget = Duration::from_millis(self.config.transcription_timeout_ms);
        match timeout(budget, self.transcriber.transcribe(audio)).await {
            Ok(Ok(transcript)) if !transcript.text.is_empty() => {
                self.stt_cache.put(
                    fingerprint,
                    transcript.clone(),
                    Duration::from_secs(self.config.stt_cache_ttl_secs),
                );
                Some(transcript)
            }
            Ok(Ok(_)) => {
                tracing::debug!("transcription produced an empty transcript");
                None
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "transcription failed");
                None
            }
            Err(_) => {
                tracing::warn!(budget_ms = budget.as_millis() as u64, "transcription timed out");
                None
            }
        }
    }

    /// Generation with the fallback-chain invariant: the routed provider
    /// first, then the alternate, then the canned response. The cache is
    /// consulted before any provider call, and a provider whose circuit is
    /// open is skipped straight to the next chain step.
    async fn generate_reply(
        &self,
        transcript: &str,
        context: &[Message],
        class: ComplexityClass,
    ) -> GeneratedReply {
        let fingerprint = Fingerprint::of_text("ai_response", transcript);
        if let Some(hit) = self.text_cache.get(&fingerprint) {
            tracing::debug!("response cache hit");
            return hit;
        }

        let fast = (&self.fast, &self.fast_breaker);
        let accurate = (&self.accurate, &self.accurate_breaker);
        let (primary, alternate) = match class {
            ComplexityClass::Complex => (accurate, fast),
            ComplexityClass::Simple | ComplexityClass::Moderate => (fast, accurate),
        };

        let budget = Duration::from_millis(self.config.generation_timeout_ms);
        for (generator, breaker) in [primary, alternate] {
            if !breaker.allow() {
                tracing::warn!(provider = ?generator.kind(), "circuit open, skipping provider");
                continue;
            }
            match timeout(budget, generator.generate(transcript, context)).await {
                Ok(Ok(text)) if !text.is_empty() => {
                    breaker.record_success();
                    let reply = GeneratedReply {
                        text,
                        provider: generator.kind(),
                    };
                    self.text_cache.put(
                        fingerprint,
                        reply.clone(),
                        Duration::from_secs(self.config.response_cache_ttl_secs),
                    );
                    return reply;
                }
                Ok(Ok(_)) => {
                    breaker.record_failure();
                    tracing::warn!(provider = ?generator.kind(), "generation returned empty text");
                }
                Ok(Err(error)) => {
                    breaker.record_failure();
                    tracing::warn!(provider = ?generator.kind(), %error, "generation failed");
                }
                Err(_) => {
                    breaker.record_failure();
                    tracing::warn!(
                        provider = ?generator.kind(),
                        budget_ms = budget.as_millis() as u64,
                        "generation timed out"
                    );
                }
            }
        }

        // Canned output is a response like any other: cached under the same
        // fingerprint so identical requests during an outage stay cheap.
        let canned = self.fallback.fallback_response(FallbackContext::Generation);
        let reply = GeneratedReply {
            text: canned.text,
            provider: ProviderKind::Fallback,
        };
        self.text_cache.put(
            fingerprint,
            reply.clone(),
            Duration::from_secs(self.config.response_cache_ttl_secs),
        );
        reply
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        let fingerprint = Fingerprint::of_audio(
            text,
            self.synthesizer.voice(),
            self.synthesizer.model(),
            self.synthesizer.speed(),
        );
        if let Some(hit) = self.audio_cache.get(&fingerprint) {
            tracing::debug!("audio cache hit");
            return Some(hit);
        }

        let budget = Duration::from_millis(self.config.synthesis_timeout_ms);
        match timeout(budget, self.synthesizer.synthesize(text)).await {
            Ok(Ok(bytes)) => {
                self.audio_cache.put(
                    fingerprint,
                    bytes.clone(),
                    Duration::from_secs(self.config.audio_cache_ttl_secs),
                );
                Some(bytes)
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "synthesis failed");
                None
            }
            Err(_) => {
                tracing::warn!(budget_ms = budget.as_millis() as u64, "synthesis timed out");
                None
            }
        }
    }

    /// Appends the turn to history and delivers the terminal `ai-response`
    /// frame. `user_turn` is absent when no transcript exists (capacity shed,
    /// transcription failure); the assistant reply is still recorded so the
    /// degraded exchange survives a reconnect.
    #[allow(clippy::too_many_arguments)]
    async fn finish_turn(
        &self,
        slot: &SessionSlot,
        sink: &dyn EventSink,
        user_turn: Option<(String, ProviderKind)>,
        reply_text: String,
        audio: Vec<u8>,
        confidence: f32,
        started: Instant,
    ) {
        let elapsed = started.elapsed().as_millis() as u64;
        let provider = match &user_turn {
            Some((_, provider)) => *provider,
            None => ProviderKind::Fallback,
        };

        {
            let mut session = slot.history.lock().await;
            if let Some((transcript, _)) = &user_turn {
                let mut message = Message::user(transcript.clone());
                message.meta.confidence = Some(confidence);
                session.push(message);
            }
            session.push(Message::assistant(
                reply_text.clone(),
                MessageMeta {
                    confidence: Some(confidence),
                    processing_time_ms: Some(elapsed),
                    provider: Some(provider),
                },
            ));
        }

        sink.deliver(ServerFrame::AiResponse(AiResponsePayload {
            text: reply_text,
            audio_buffer: BASE64.encode(&audio),
            confidence,
            processing_time: elapsed,
            provider,
        }));
    }

    fn status(&self, sink: &dyn EventSink, message: &str) {
        sink.deliver(ServerFrame::Status {
            state: VoiceState::Processing,
            message: message.to_string(),
        });
    }

    fn deliver_error(&self, sink: &dyn EventSink, request_id: &str, error: &OrchestrationError) {
        sink.deliver(ServerFrame::Error(ErrorPayload {
            code: error.code().to_string(),
            message: error.to_string(),
            details: None,
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
        }));
    }
}
