//! Text-submit endpoint, used by degraded clients and non-voice callers.

use crate::AppState;
use axum::{extract::Extension, http::StatusCode, Json};
use ellery_types::ProviderKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSubmitRequest {
    pub message: String,
    /// Continues an existing conversation; a fresh session is created when
    /// absent.
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSubmitResponse {
    pub response: String,
    /// Server-side processing time in milliseconds.
    pub processing_time: u64,
    pub session_id: String,
    pub provider: ProviderKind,
}

/// Strips control characters and collapses leading/trailing whitespace.
/// Returns `None` when nothing usable remains or the ceiling is exceeded.
fn sanitize(message: &str, max_chars: usize) -> Option<String> {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().count() > max_chars {
        return None;
    }
    Some(trimmed.to_string())
}

/// `POST /api/text` — same pipeline as a voice turn, minus capture and
/// synthesis. Never fails for provider reasons; those resolve to the canned
/// fallback inside the orchestrator.
pub async fn text_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<TextSubmitRequest>,
) -> Result<Json<TextSubmitResponse>, StatusCode> {
    let message = sanitize(&request.message, state.max_message_chars)
        .ok_or(StatusCode::BAD_REQUEST)?;

    let session_id = request
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let turn = state
        .orchestrator
        .handle_text_input(&session_id, &message)
        .await;

    tracing::info!(
        session_id = %session_id,
        provider = turn.provider.label(),
        elapsed_ms = turn.processing_time_ms,
        "text turn complete"
    );

    Ok(Json(TextSubmitResponse {
        response: turn.response,
        processing_time: turn.processing_time_ms,
        session_id,
        provider: turn.provider,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_control_characters() {
        assert_eq!(
            sanitize("  hello\u{0000} there\u{0007} ", 100).as_deref(),
            Some("hello there")
        );
    }

    #[test]
    fn sanitize_rejects_empty_and_oversized_input() {
        assert_eq!(sanitize("   ", 100), None);
        assert_eq!(sanitize("\u{0000}\u{0001}", 100), None);
        assert_eq!(sanitize(&"x".repeat(101), 100), None);
        assert!(sanitize(&"x".repeat(100), 100).is_some());
    }

    #[test]
    fn sanitize_keeps_newlines() {
        assert_eq!(sanitize("line one\nline two", 100).as_deref(), Some("line one\nline two"));
    }
}
