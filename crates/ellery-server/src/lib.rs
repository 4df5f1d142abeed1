//! Ellery server library logic.
//!
//! Wires the response orchestrator, session registry, and rate limiter into
//! an axum application: `/ws` for the voice session transport, `/api/text`
//! for the degraded text path, `/health` for monitoring.

pub mod api_text;
pub mod config;
pub mod middleware;
pub mod ws;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::Config;
use ellery_classify::HeuristicClassifier;
use ellery_orchestrator::{Collaborators, Orchestrator};
use ellery_providers::{
    FallbackService, HttpGenerator, HttpSynthesizer, HttpTranscriber,
};
use ellery_types::ProviderKind;
use middleware::RateLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use ws::SessionRegistry;

/// Maximum request body size (4 MiB). Voice payloads travel over the
/// WebSocket, so the HTTP surface only carries text requests.
const MAX_REQUEST_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Application state shared across all request handlers.
pub struct AppState {
    /// The response pipeline.
    pub orchestrator: Arc<Orchestrator>,
    /// Session id → attached socket.
    pub registry: SessionRegistry,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Requests allowed per IP per window.
    pub rate_limit: u32,
    /// Grace period before a disconnected session is destroyed.
    pub disconnect_timeout_secs: u64,
    /// Ceiling on one text-mode message.
    pub max_message_chars: usize,
}

impl AppState {
    /// Builds the full state from configuration, constructing the HTTP
    /// providers and injecting them into the orchestrator.
    pub fn from_config(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.providers.http_timeout_ms))
            .build()
            .unwrap_or_default();

        let collaborators = Collaborators {
            transcriber: Arc::new(HttpTranscriber::new(
                client.clone(),
                config.providers.transcription.clone(),
            )),
            fast: Arc::new(HttpGenerator::new(
                client.clone(),
                config.providers.generation_fast.clone(),
                ProviderKind::Fast,
                config.providers.system_prompt.clone(),
            )),
            accurate: Arc::new(HttpGenerator::new(
                client.clone(),
                config.providers.generation_accurate.clone(),
                ProviderKind::Accurate,
                config.providers.system_prompt.clone(),
            )),
            synthesizer: Arc::new(HttpSynthesizer::new(
                client,
                config.providers.synthesis.clone(),
                config.providers.voice.clone(),
                config.providers.speed,
            )),
            classifier: Arc::new(HeuristicClassifier::new(config.classifier.clone())),
        };

        let orchestrator = Arc::new(Orchestrator::new(
            collaborators,
            FallbackService::new(),
            config.orchestrator.clone(),
        ));

        Self {
            orchestrator,
            registry: SessionRegistry::new(),
            rate_limiter: RateLimiter::new(),
            rate_limit: config.rate_limit.limit,
            disconnect_timeout_secs: config.session.disconnect_timeout_secs,
            max_message_chars: config.session.max_message_chars,
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/text", post(api_text::text_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
