//! Canned responses for when upstream providers are unavailable.
//!
//! The fallback service never performs I/O and cannot fail: text is canned
//! per failed stage and the audio cue is synthesized locally as a short PCM
//! tone. Downstream, the orchestrator treats fallback output exactly like a
//! normal response — cached, deliverable, loggable — so the client only sees
//! the difference in metadata.

use ellery_types::{AudioResponse, ProviderKind};

/// Which stage the pipeline was in when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackContext {
    /// Speech-to-text failed; we never got a transcript.
    Transcription,
    /// Both generation providers failed for this turn.
    Generation,
    /// We have reply text but could not synthesize speech for it.
    Synthesis,
    /// Concurrency caps left no capacity for this turn.
    Capacity,
}

/// Sample rate of the locally generated audio cue (s16le mono).
const CUE_SAMPLE_RATE_HZ: u32 = 22_050;
/// Duration of the cue tone in milliseconds.
const CUE_DURATION_MS: u32 = 300;
/// Cue tone pitch.
const CUE_FREQ_HZ: f32 = 440.0;

/// Supplies degraded output when providers are down and signals load shedding.
#[derive(Debug, Clone)]
pub struct FallbackService {
    /// Pre-rendered audio cue, shared by every fallback response.
    cue: Vec<u8>,
}

impl FallbackService {
    pub fn new() -> Self {
        Self { cue: render_cue() }
    }

    /// Returns a canned, context-appropriate response. Always succeeds; no
    /// external provider state is consulted.
    pub fn fallback_response(&self, context: FallbackContext) -> AudioResponse {
        let text = match context {
            FallbackContext::Transcription => {
                "I'm sorry, I couldn't make out what you said just now. \
                 Could you repeat that, or type your question instead?"
            }
            FallbackContext::Generation => {
                "I apologize, but I'm having trouble processing your request \
                 right now. Please try again in a moment."
            }
            FallbackContext::Synthesis => {
                "I have your answer, but I can't read it aloud right now. \
                 Please see the text of this reply."
            }
            FallbackContext::Capacity => {
                "I'm helping a lot of people at the moment. Please give me a \
                 few seconds and try again."
            }
        };

        AudioResponse {
            text: text.to_string(),
            audio: self.cue.clone(),
            confidence: 0.0,
            processing_time_ms: 0,
            provider: ProviderKind::Fallback,
        }
    }
}

impl Default for FallbackService {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the cue tone: a sine burst with a linear fade-out to avoid a
/// click at the end, encoded as little-endian s16 mono.
fn render_cue() -> Vec<u8> {
    let samples = (CUE_SAMPLE_RATE_HZ * CUE_DURATION_MS / 1000) as usize;
    let mut pcm = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let t = i as f32 / CUE_SAMPLE_RATE_HZ as f32;
        let fade = 1.0 - (i as f32 / samples as f32);
        let amplitude = (t * CUE_FREQ_HZ * 2.0 * std::f32::consts::PI).sin() * fade * 0.3;
        let sample = (amplitude * i16::MAX as f32) as i16;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    pcm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_never_fails_and_is_marked_degraded() {
        let service = FallbackService::new();
        for context in [
            FallbackContext::Transcription,
            FallbackContext::Generation,
            FallbackContext::Synthesis,
            FallbackContext::Capacity,
        ] {
            let response = service.fallback_response(context);
            assert!(!response.text.is_empty());
            assert!(!response.audio.is_empty());
            assert_eq!(response.provider, ProviderKind::Fallback);
        }
    }

    #[test]
    fn fallback_is_deterministic_per_context() {
        let service = FallbackService::new();
        let a = service.fallback_response(FallbackContext::Generation);
        let b = service.fallback_response(FallbackContext::Generation);
        assert_eq!(a.text, b.text);
        assert_eq!(a.audio, b.audio);
    }

    #[test]
    fn cue_has_expected_length_and_fades_out() {
        let cue = render_cue();
        let expected_samples = (CUE_SAMPLE_RATE_HZ * CUE_DURATION_MS / 1000) as usize;
        assert_eq!(cue.len(), expected_samples * 2);

        // Final sample should be near silence thanks to the fade.
        let last = i16::from_le_bytes([cue[cue.len() - 2], cue[cue.len() - 1]]);
        assert!(last.abs() < 200, "last sample {last} should be faded out");
    }
}
