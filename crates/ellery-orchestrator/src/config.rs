//! Tunables for the response pipeline.

use serde::Deserialize;

/// Stage budgets, concurrency caps, and cache TTLs.
///
/// Every field has a serde default so a config file only needs to name the
/// values it changes.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Budget for one transcription call, in milliseconds.
    #[serde(default = "default_transcription_timeout_ms")]
    pub transcription_timeout_ms: u64,
    /// Budget for one generation call, in milliseconds.
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    /// Budget for one synthesis call, in milliseconds.
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,
    /// Global cap on concurrently running turns.
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
    /// Cap on concurrently running turns within one session.
    #[serde(default = "default_max_turns_per_session")]
    pub max_turns_per_session: usize,
    /// How long a turn may wait for a permit before it is shed to the
    /// fallback service instead of queuing.
    #[serde(default = "default_permit_grace_ms")]
    pub permit_grace_ms: u64,
    /// TTL for cached transcription results, in seconds.
    #[serde(default = "default_stt_cache_ttl_secs")]
    pub stt_cache_ttl_secs: u64,
    /// TTL for cached generated text, in seconds.
    #[serde(default = "default_response_cache_ttl_secs")]
    pub response_cache_ttl_secs: u64,
    /// TTL for cached synthesized audio, in seconds.
    #[serde(default = "default_audio_cache_ttl_secs")]
    pub audio_cache_ttl_secs: u64,
    /// How many recent messages feed generation as context.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
    /// Consecutive failures before a provider's circuit opens.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// How long an open circuit skips a provider before a trial call.
    #[serde(default = "default_breaker_recovery_secs")]
    pub breaker_recovery_secs: u64,
}

fn default_transcription_timeout_ms() -> u64 {
    10_000
}

fn default_generation_timeout_ms() -> u64 {
    30_000
}

fn default_synthesis_timeout_ms() -> u64 {
    15_000
}

fn default_max_concurrent_turns() -> usize {
    32
}

fn default_max_turns_per_session() -> usize {
    2
}

fn default_permit_grace_ms() -> u64 {
    250
}

fn default_stt_cache_ttl_secs() -> u64 {
    3_600
}

fn default_response_cache_ttl_secs() -> u64 {
    1_800
}

fn default_audio_cache_ttl_secs() -> u64 {
    86_400
}

fn default_history_depth() -> usize {
    10
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_recovery_secs() -> u64 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            transcription_timeout_ms: default_transcription_timeout_ms(),
            generation_timeout_ms: default_generation_timeout_ms(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            max_concurrent_turns: default_max_concurrent_turns(),
            max_turns_per_session: default_max_turns_per_session(),
            permit_grace_ms: default_permit_grace_ms(),
            stt_cache_ttl_secs: default_stt_cache_ttl_secs(),
            response_cache_ttl_secs: default_response_cache_ttl_secs(),
            audio_cache_ttl_secs: default_audio_cache_ttl_secs(),
            history_depth: default_history_depth(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_recovery_secs: default_breaker_recovery_secs(),
        }
    }
}
