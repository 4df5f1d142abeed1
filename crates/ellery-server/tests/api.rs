//! HTTP surface tests driven through the router with `oneshot`, no sockets.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use ellery_server::{app, config::Config, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::ServiceExt;

/// Providers pointed at a closed local port so every upstream call fails
/// fast with connection refused and the pipeline resolves to its fallback.
fn offline_config() -> Config {
    let mut config = Config::default();
    let dead = "http://127.0.0.1:9";
    config.providers.transcription.base_url = dead.to_string();
    config.providers.generation_fast.base_url = dead.to_string();
    config.providers.generation_accurate.base_url = dead.to_string();
    config.providers.synthesis.base_url = dead.to_string();
    config.providers.http_timeout_ms = 500;
    config.orchestrator.generation_timeout_ms = 1_000;
    config
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(addr));
    match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app(AppState::from_config(&Config::default()));

    let response = app.oneshot(request("GET", "/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn text_endpoint_rejects_blank_messages() {
    let app = app(AppState::from_config(&Config::default()));

    let response = app
        .oneshot(request(
            "POST",
            "/api/text",
            Some(json!({ "message": "   " })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn text_endpoint_rejects_oversized_messages() {
    let mut config = Config::default();
    config.session.max_message_chars = 16;
    let app = app(AppState::from_config(&config));

    let response = app
        .oneshot(request(
            "POST",
            "/api/text",
            Some(json!({ "message": "x".repeat(17) })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn text_endpoint_resolves_to_fallback_when_providers_are_down() {
    let app = app(AppState::from_config(&offline_config()));

    let response = app
        .oneshot(request(
            "POST",
            "/api/text",
            Some(json!({ "message": "what are your office hours?" })),
        ))
        .await
        .unwrap();

    // Provider outage never surfaces as an HTTP error.
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["provider"], "fallback");
    assert!(!body["response"].as_str().unwrap().is_empty());
    assert!(!body["sessionId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn text_endpoint_keeps_the_session_across_turns() {
    let app = app(AppState::from_config(&offline_config()));

    let first = body_json(
        app.clone()
            .oneshot(request(
                "POST",
                "/api/text",
                Some(json!({ "message": "hello" })),
            ))
            .await
            .unwrap(),
    )
    .await;
    let session_id = first["sessionId"].as_str().unwrap().to_string();

    let second = body_json(
        app.oneshot(request(
            "POST",
            "/api/text",
            Some(json!({ "message": "hello again", "sessionId": session_id })),
        ))
        .await
        .unwrap(),
    )
    .await;

    assert_eq!(second["sessionId"].as_str().unwrap(), session_id);
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let mut config = Config::default();
    config.rate_limit.limit = 2;
    let app = app(AppState::from_config(&config));

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(request("GET", "/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get("retry-after").unwrap(),
        &axum::http::HeaderValue::from_static("60")
    );
}
