//! End-to-end pipeline tests with scripted provider doubles.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ellery_classify::HeuristicClassifier;
use ellery_orchestrator::{Collaborators, EventSink, Orchestrator, OrchestratorConfig};
use ellery_providers::{
    FallbackService, Generator, ProviderError, Synthesizer, Transcriber, Transcript,
};
use ellery_types::{AudioFormat, AudioInput, Message, ProviderKind, Role, ServerFrame};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct ScriptedTranscriber {
    text: Option<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    fn ok(text: &'static str) -> Arc<Self> {
        Arc::new(Self {
            text: Some(text),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &AudioInput) -> Result<Transcript, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.text {
            Some(text) => Ok(Transcript {
                text: text.to_string(),
                confidence: 0.92,
            }),
            None => Err(ProviderError::Unavailable("transcription down".to_string())),
        }
    }
}

struct ScriptedGenerator {
    kind: ProviderKind,
    reply: Option<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn ok(kind: ProviderKind, reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply: Some(reply),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            reply: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str, _context: &[Message]) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Some(reply) => Ok(reply.to_string()),
            None => Err(ProviderError::Unavailable("generation down".to_string())),
        }
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

struct ScriptedSynthesizer {
    ok: bool,
    calls: AtomicUsize,
}

impl ScriptedSynthesizer {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            ok: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            ok: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.ok {
            Ok(vec![1u8; 64])
        } else {
            Err(ProviderError::Unavailable("synthesis down".to_string()))
        }
    }

    fn voice(&self) -> &str {
        "alloy"
    }

    fn model(&self) -> &str {
        "tts-1"
    }

    fn speed(&self) -> f32 {
        1.0
    }
}

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<ServerFrame>>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<ServerFrame> {
        self.frames.lock().unwrap().clone()
    }

    fn terminal_frames(&self) -> Vec<ServerFrame> {
        self.frames()
            .into_iter()
            .filter(|frame| {
                matches!(frame, ServerFrame::AiResponse(_) | ServerFrame::Error(_))
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, frame: ServerFrame) {
        self.frames.lock().unwrap().push(frame);
    }
}

/// A sink whose client is gone; delivery drops everything.
struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _frame: ServerFrame) {}
}

struct Harness {
    orchestrator: Orchestrator,
    transcriber: Arc<ScriptedTranscriber>,
    fast: Arc<ScriptedGenerator>,
    accurate: Arc<ScriptedGenerator>,
    synthesizer: Arc<ScriptedSynthesizer>,
}

fn harness_with_config(
    transcriber: Arc<ScriptedTranscriber>,
    fast: Arc<ScriptedGenerator>,
    accurate: Arc<ScriptedGenerator>,
    synthesizer: Arc<ScriptedSynthesizer>,
    config: OrchestratorConfig,
) -> Harness {
    let orchestrator = Orchestrator::new(
        Collaborators {
            transcriber: transcriber.clone(),
            fast: fast.clone(),
            accurate: accurate.clone(),
            synthesizer: synthesizer.clone(),
            classifier: Arc::new(HeuristicClassifier::default()),
        },
        FallbackService::new(),
        config,
    );
    Harness {
        orchestrator,
        transcriber,
        fast,
        accurate,
        synthesizer,
    }
}

fn harness(
    transcriber: Arc<ScriptedTranscriber>,
    fast: Arc<ScriptedGenerator>,
    accurate: Arc<ScriptedGenerator>,
    synthesizer: Arc<ScriptedSynthesizer>,
) -> Harness {
    harness_with_config(
        transcriber,
        fast,
        accurate,
        synthesizer,
        OrchestratorConfig::default(),
    )
}

fn two_second_wav() -> AudioInput {
    let mut input = AudioInput::new(vec![7u8; 32_000], AudioFormat::Wav);
    input.duration_ms = Some(2_000);
    input
}

fn ai_response(frame: &ServerFrame) -> &ellery_types::AiResponsePayload {
    match frame {
        ServerFrame::AiResponse(payload) => payload,
        other => panic!("expected ai-response, got {other:?}"),
    }
}

#[tokio::test]
async fn happy_path_simple_greeting_takes_fast_provider() {
    let h = harness(
        ScriptedTranscriber::ok("Hello there"),
        ScriptedGenerator::ok(ProviderKind::Fast, "Hello! How can I help you today?"),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unexpected"),
        ScriptedSynthesizer::ok(),
    );
    let sink = RecordingSink::default();

    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;

    let terminal = sink.terminal_frames();
    assert_eq!(terminal.len(), 1);
    let payload = ai_response(&terminal[0]);
    assert!(payload.text.starts_with("Hello!"));
    assert_eq!(payload.provider, ProviderKind::Fast);
    assert!(!payload.audio_buffer.is_empty());
    assert!(!BASE64.decode(&payload.audio_buffer).unwrap().is_empty());

    // Progress frames precede the terminal event.
    let statuses: Vec<_> = sink
        .frames()
        .into_iter()
        .filter_map(|frame| match frame {
            ServerFrame::Status { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, ["transcribing", "generating", "synthesizing"]);

    assert_eq!(h.fast.calls(), 1);
    assert_eq!(h.accurate.calls(), 0);

    let history = h.orchestrator.session_messages("s-1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].text, "Hello there");
    assert_eq!(history[1].role, Role::Assistant);
}

#[tokio::test]
async fn complex_query_routes_to_accurate_provider() {
    let h = harness(
        ScriptedTranscriber::ok(
            "My landlord breached the contract, can I claim damages for negligence under the statute?",
        ),
        ScriptedGenerator::ok(ProviderKind::Fast, "unexpected"),
        ScriptedGenerator::ok(ProviderKind::Accurate, "You may have a claim. Here is why."),
        ScriptedSynthesizer::ok(),
    );
    let sink = RecordingSink::default();

    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;

    let terminal = sink.terminal_frames();
    assert_eq!(ai_response(&terminal[0]).provider, ProviderKind::Accurate);
    assert_eq!(h.accurate.calls(), 1);
    assert_eq!(h.fast.calls(), 0);
}

#[tokio::test]
async fn provider_outage_walks_the_fallback_chain() {
    let h = harness(
        ScriptedTranscriber::ok("Hello there"),
        ScriptedGenerator::failing(ProviderKind::Fast),
        ScriptedGenerator::failing(ProviderKind::Accurate),
        ScriptedSynthesizer::ok(),
    );
    let sink = RecordingSink::default();

    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;

    // Routed provider first, then the alternate, then canned output with the
    // same event shape as a normal response.
    assert_eq!(h.fast.calls(), 1);
    assert_eq!(h.accurate.calls(), 1);

    let terminal = sink.terminal_frames();
    assert_eq!(terminal.len(), 1);
    let payload = ai_response(&terminal[0]);
    assert_eq!(payload.provider, ProviderKind::Fallback);
    assert!(!payload.text.is_empty());
    assert!(!payload.audio_buffer.is_empty());
}

#[tokio::test]
async fn canned_replies_are_cached_like_normal_responses() {
    let h = harness(
        ScriptedTranscriber::ok("Hello there"),
        ScriptedGenerator::failing(ProviderKind::Fast),
        ScriptedGenerator::failing(ProviderKind::Accurate),
        ScriptedSynthesizer::ok(),
    );

    let sink = RecordingSink::default();
    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;
    assert_eq!(h.fast.calls(), 1);
    assert_eq!(h.accurate.calls(), 1);

    // An identical request during the outage hits the cache; no provider is
    // retried.
    let sink = RecordingSink::default();
    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;
    assert_eq!(h.fast.calls(), 1);
    assert_eq!(h.accurate.calls(), 1);
    assert_eq!(
        ai_response(&sink.terminal_frames()[0]).provider,
        ProviderKind::Fallback
    );
}

#[tokio::test]
async fn transcription_outage_yields_canned_response_without_generation() {
    let h = harness(
        ScriptedTranscriber::failing(),
        ScriptedGenerator::ok(ProviderKind::Fast, "unexpected"),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unexpected"),
        ScriptedSynthesizer::ok(),
    );
    let sink = RecordingSink::default();

    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;

    let terminal = sink.terminal_frames();
    assert_eq!(terminal.len(), 1);
    assert_eq!(ai_response(&terminal[0]).provider, ProviderKind::Fallback);
    assert_eq!(h.fast.calls(), 0);
    assert_eq!(h.accurate.calls(), 0);
}

#[tokio::test]
async fn synthesis_outage_keeps_generated_text_with_fallback_audio() {
    let h = harness(
        ScriptedTranscriber::ok("What are your opening hours on weekdays"),
        ScriptedGenerator::ok(ProviderKind::Fast, "We are open nine to five."),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unexpected"),
        ScriptedSynthesizer::failing(),
    );
    let sink = RecordingSink::default();

    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;

    let terminal = sink.terminal_frames();
    let payload = ai_response(&terminal[0]);
    assert_eq!(payload.text, "We are open nine to five.");
    assert_eq!(payload.provider, ProviderKind::Fallback);
    assert!(!payload.audio_buffer.is_empty());
}

#[tokio::test]
async fn empty_audio_is_rejected_with_one_error_event() {
    let h = harness(
        ScriptedTranscriber::ok("unused"),
        ScriptedGenerator::ok(ProviderKind::Fast, "unused"),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unused"),
        ScriptedSynthesizer::ok(),
    );
    let sink = RecordingSink::default();

    h.orchestrator
        .handle_voice_input("s-1", AudioInput::new(Vec::new(), AudioFormat::Wav), &sink)
        .await;

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerFrame::Error(payload) => {
            assert_eq!(payload.code, "invalid_audio");
            assert_eq!(payload.message, "invalid audio: audio payload is empty");
            assert!(!payload.request_id.is_empty());
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(h.transcriber.calls(), 0);
}

#[tokio::test]
async fn oversized_audio_is_rejected() {
    let h = harness(
        ScriptedTranscriber::ok("unused"),
        ScriptedGenerator::ok(ProviderKind::Fast, "unused"),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unused"),
        ScriptedSynthesizer::ok(),
    );
    let sink = RecordingSink::default();
    let oversized = AudioInput::new(vec![0u8; ellery_types::MAX_AUDIO_BYTES + 1], AudioFormat::Mp3);

    h.orchestrator
        .handle_voice_input("s-1", oversized, &sink)
        .await;

    assert_eq!(sink.terminal_frames().len(), 1);
    assert!(matches!(sink.frames()[0], ServerFrame::Error(_)));
}

#[tokio::test]
async fn every_outcome_emits_exactly_one_terminal_event() {
    let scripts: Vec<Harness> = vec![
        harness(
            ScriptedTranscriber::ok("Hello there"),
            ScriptedGenerator::ok(ProviderKind::Fast, "Hi!"),
            ScriptedGenerator::ok(ProviderKind::Accurate, "Hi!"),
            ScriptedSynthesizer::ok(),
        ),
        harness(
            ScriptedTranscriber::failing(),
            ScriptedGenerator::ok(ProviderKind::Fast, "Hi!"),
            ScriptedGenerator::ok(ProviderKind::Accurate, "Hi!"),
            ScriptedSynthesizer::ok(),
        ),
        harness(
            ScriptedTranscriber::ok("Hello there"),
            ScriptedGenerator::failing(ProviderKind::Fast),
            ScriptedGenerator::failing(ProviderKind::Accurate),
            ScriptedSynthesizer::failing(),
        ),
    ];

    for h in &scripts {
        let sink = RecordingSink::default();
        h.orchestrator
            .handle_voice_input("s-1", two_second_wav(), &sink)
            .await;
        assert_eq!(sink.terminal_frames().len(), 1);
    }
}

#[tokio::test]
async fn disconnect_mid_turn_still_populates_the_cache() {
    let h = harness(
        ScriptedTranscriber::ok("Hello there"),
        ScriptedGenerator::ok(ProviderKind::Fast, "Hello! How can I help?"),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unexpected"),
        ScriptedSynthesizer::ok(),
    );

    // First turn goes to a client that is already gone.
    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &NullSink)
        .await;
    assert_eq!(h.fast.calls(), 1);

    // An identical turn from another session is served from cache end to end.
    let sink = RecordingSink::default();
    h.orchestrator
        .handle_voice_input("s-2", two_second_wav(), &sink)
        .await;

    assert_eq!(h.transcriber.calls(), 1);
    assert_eq!(h.fast.calls(), 1);
    assert_eq!(h.synthesizer.calls(), 1);
    let frames = sink.terminal_frames();
    let payload = ai_response(&frames[0]);
    assert_eq!(payload.text, "Hello! How can I help?");
}

#[tokio::test]
async fn saturated_capacity_sheds_to_fallback_without_provider_calls() {
    let config = OrchestratorConfig {
        max_concurrent_turns: 0,
        permit_grace_ms: 10,
        ..Default::default()
    };
    let h = harness_with_config(
        ScriptedTranscriber::ok("Hello there"),
        ScriptedGenerator::ok(ProviderKind::Fast, "unused"),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unused"),
        ScriptedSynthesizer::ok(),
        config,
    );
    let sink = RecordingSink::default();

    h.orchestrator
        .handle_voice_input("s-1", two_second_wav(), &sink)
        .await;

    let terminal = sink.terminal_frames();
    assert_eq!(terminal.len(), 1);
    assert_eq!(ai_response(&terminal[0]).provider, ProviderKind::Fallback);
    assert_eq!(h.transcriber.calls(), 0);
}

#[tokio::test]
async fn open_circuit_skips_dead_providers_without_redialing() {
    let config = OrchestratorConfig {
        breaker_failure_threshold: 2,
        breaker_recovery_secs: 3_600,
        ..Default::default()
    };
    let h = harness_with_config(
        ScriptedTranscriber::ok("unused"),
        ScriptedGenerator::failing(ProviderKind::Fast),
        ScriptedGenerator::failing(ProviderKind::Accurate),
        ScriptedSynthesizer::ok(),
        config,
    );

    // Distinct messages so the canned-reply cache cannot shield the turns.
    h.orchestrator
        .handle_text_input("s-1", "where can I park near the office")
        .await;
    h.orchestrator
        .handle_text_input("s-1", "what floor is the reception on")
        .await;
    assert_eq!(h.fast.calls(), 2);
    assert_eq!(h.accurate.calls(), 2);

    // Both circuits are open now: the next turn goes straight to the canned
    // response without touching either provider.
    let turn = h
        .orchestrator
        .handle_text_input("s-1", "do you have wheelchair access")
        .await;
    assert_eq!(h.fast.calls(), 2);
    assert_eq!(h.accurate.calls(), 2);
    assert_eq!(turn.provider, ProviderKind::Fallback);
}

#[tokio::test]
async fn open_circuit_admits_a_trial_call_after_recovery() {
    let config = OrchestratorConfig {
        breaker_failure_threshold: 1,
        breaker_recovery_secs: 0,
        ..Default::default()
    };
    let h = harness_with_config(
        ScriptedTranscriber::ok("unused"),
        ScriptedGenerator::failing(ProviderKind::Fast),
        ScriptedGenerator::ok(ProviderKind::Accurate, "Covered by the alternate."),
        ScriptedSynthesizer::ok(),
        config,
    );

    let turn = h
        .orchestrator
        .handle_text_input("s-1", "where can I park near the office")
        .await;
    assert_eq!(turn.provider, ProviderKind::Accurate);
    assert_eq!(h.fast.calls(), 1);

    // The recovery window has elapsed, so the open circuit lets one trial
    // call through rather than skipping the provider forever.
    h.orchestrator
        .handle_text_input("s-1", "what floor is the reception on")
        .await;
    assert_eq!(h.fast.calls(), 2);
}

#[tokio::test]
async fn text_path_runs_the_pipeline_minus_capture_and_synthesis() {
    let h = harness(
        ScriptedTranscriber::ok("unused"),
        ScriptedGenerator::ok(ProviderKind::Fast, "We open at nine."),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unexpected"),
        ScriptedSynthesizer::ok(),
    );

    let turn = h
        .orchestrator
        .handle_text_input("s-1", "What time do you open")
        .await;

    assert_eq!(turn.response, "We open at nine.");
    assert_eq!(turn.provider, ProviderKind::Fast);
    assert_eq!(h.synthesizer.calls(), 0);
    assert_eq!(h.transcriber.calls(), 0);

    let history = h.orchestrator.session_messages("s-1").await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].text, "We open at nine.");
}

#[tokio::test]
async fn removed_session_forgets_its_history() {
    let h = harness(
        ScriptedTranscriber::ok("unused"),
        ScriptedGenerator::ok(ProviderKind::Fast, "Hi."),
        ScriptedGenerator::ok(ProviderKind::Accurate, "unexpected"),
        ScriptedSynthesizer::ok(),
    );

    h.orchestrator.handle_text_input("s-1", "hello").await;
    assert_eq!(h.orchestrator.session_messages("s-1").await.len(), 2);

    h.orchestrator.remove_session("s-1").await;
    assert!(h.orchestrator.session_messages("s-1").await.is_empty());
}
