//! Server configuration loading from file and environment variables.

use ellery_classify::ClassifierConfig;
use ellery_orchestrator::OrchestratorConfig;
use ellery_providers::ProviderEndpoint;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream provider endpoints and credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Pipeline budgets, caps, and cache TTLs.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Complexity-classifier thresholds.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Session transport settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Rate limiting settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "ellery_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Upstream provider configuration.
///
/// The four endpoints follow the OpenAI-compatible API family; fast and
/// accurate generation may point at different vendors entirely. API keys are
/// redacted from Debug output by [`ProviderEndpoint`].
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_transcription_endpoint")]
    pub transcription: ProviderEndpoint,

    #[serde(default = "default_fast_endpoint")]
    pub generation_fast: ProviderEndpoint,

    #[serde(default = "default_accurate_endpoint")]
    pub generation_accurate: ProviderEndpoint,

    #[serde(default = "default_synthesis_endpoint")]
    pub synthesis: ProviderEndpoint,

    /// Voice used for synthesized speech.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Speech speed multiplier.
    #[serde(default = "default_speed")]
    pub speed: f32,

    /// System prompt prepended to every generation request.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Per-request timeout for the shared HTTP client, in milliseconds.
    /// Stage budgets in the orchestrator are the effective bound; this is the
    /// socket-level backstop beneath them.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

/// Session transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How long a disconnected session's state is retained for reconnection
    /// before it is destroyed, in seconds.
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,

    /// Ceiling on one text-mode message, in characters.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

/// Rate limiting configuration (fixed 60-second window).
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per client IP per window.
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_transcription_endpoint() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.openai.com/v1".to_string(),
        api_key: String::new(),
        model: "whisper-1".to_string(),
    }
}

fn default_fast_endpoint() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.groq.com/openai/v1".to_string(),
        api_key: String::new(),
        model: "llama-3.1-8b-instant".to_string(),
    }
}

fn default_accurate_endpoint() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.openai.com/v1".to_string(),
        api_key: String::new(),
        model: "gpt-4o".to_string(),
    }
}

fn default_synthesis_endpoint() -> ProviderEndpoint {
    ProviderEndpoint {
        base_url: "https://api.openai.com/v1".to_string(),
        api_key: String::new(),
        model: "tts-1".to_string(),
    }
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_system_prompt() -> String {
    "You are Ellery, a courteous receptionist for a law office. Answer briefly \
     and clearly; for substantive legal questions, recommend speaking with an \
     attorney."
        .to_string()
}

fn default_http_timeout_ms() -> u64 {
    45_000
}

fn default_disconnect_timeout_secs() -> u64 {
    300
}

fn default_max_message_chars() -> usize {
    2_000
}

fn default_rate_limit() -> u32 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            transcription: default_transcription_endpoint(),
            generation_fast: default_fast_endpoint(),
            generation_accurate: default_accurate_endpoint(),
            synthesis: default_synthesis_endpoint(),
            voice: default_voice(),
            speed: default_speed(),
            system_prompt: default_system_prompt(),
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout_secs: default_disconnect_timeout_secs(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ELLERY_HOST` overrides `server.host`
/// - `ELLERY_PORT` overrides `server.port`
/// - `ELLERY_LOG_LEVEL` overrides `logging.level`
/// - `ELLERY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `ELLERY_API_KEY` fills every provider key that is still empty
/// - `ELLERY_TRANSCRIPTION_API_KEY`, `ELLERY_FAST_API_KEY`,
///   `ELLERY_ACCURATE_API_KEY`, `ELLERY_SYNTHESIS_API_KEY` override per slot
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("ELLERY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("ELLERY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(level) = std::env::var("ELLERY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("ELLERY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key) = std::env::var("ELLERY_API_KEY") {
        for endpoint in [
            &mut config.providers.transcription,
            &mut config.providers.generation_fast,
            &mut config.providers.generation_accurate,
            &mut config.providers.synthesis,
        ] {
            if endpoint.api_key.is_empty() {
                endpoint.api_key = key.clone();
            }
        }
    }
    if let Ok(key) = std::env::var("ELLERY_TRANSCRIPTION_API_KEY") {
        config.providers.transcription.api_key = key;
    }
    if let Ok(key) = std::env::var("ELLERY_FAST_API_KEY") {
        config.providers.generation_fast.api_key = key;
    }
    if let Ok(key) = std::env::var("ELLERY_ACCURATE_API_KEY") {
        config.providers.generation_accurate.api_key = key;
    }
    if let Ok(key) = std::env::var("ELLERY_SYNTHESIS_API_KEY") {
        config.providers.synthesis.api_key = key;
    }

    Ok(config)
}
