//! WebSocket transport handler and session registry.
//!
//! One socket carries one session. A session's server-side state (history,
//! caches, permits) lives in the orchestrator; the registry only maps session
//! ids to the currently attached socket's sender. A client that reconnects
//! with its `sessionId` query parameter re-attaches to its session; a session
//! whose socket stays gone past the disconnect timeout is destroyed.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, Query, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ellery_orchestrator::EventSink;
use ellery_types::{AudioInput, ClientFrame, ErrorPayload, OrchestrationError, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One session's attachment state.
struct SessionHandle {
    /// Identifies the current socket; a stale detach from a replaced socket
    /// must not tear down its successor.
    connection_id: Uuid,
    /// Present while a socket is attached.
    sender: Option<mpsc::Sender<String>>,
}

type SessionMap = HashMap<String, SessionHandle>;

/// Maps session ids to their attached WebSocket senders.
///
/// Uses `std::sync::RwLock` intentionally: all lock acquisitions are brief
/// HashMap operations that never span `.await` points, which also lets the
/// orchestrator's synchronous delivery path use it directly.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a socket to a session, replacing any previous attachment
    /// (reconnect). Returns the new connection id.
    pub fn attach(&self, session_id: &str, sender: mpsc::Sender<String>) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut sessions = self.write();
        let replaced = sessions
            .insert(
                session_id.to_string(),
                SessionHandle {
                    connection_id,
                    sender: Some(sender),
                },
            )
            .is_some();
        if replaced {
            tracing::info!(session_id = %session_id, "socket re-attached to existing session");
        }
        connection_id
    }

    /// Marks a session's socket as gone. A no-op when a newer socket has
    /// already replaced this connection.
    pub fn detach(&self, session_id: &str, connection_id: Uuid) {
        let mut sessions = self.write();
        if let Some(handle) = sessions.get_mut(session_id) {
            if handle.connection_id == connection_id {
                handle.sender = None;
            }
        }
    }

    /// Removes the session entry if it is still detached from this
    /// connection. Returns whether the entry was removed.
    pub fn remove_if_detached(&self, session_id: &str, connection_id: Uuid) -> bool {
        let mut sessions = self.write();
        match sessions.get(session_id) {
            Some(handle) if handle.connection_id == connection_id && handle.sender.is_none() => {
                sessions.remove(session_id);
                true
            }
            _ => false,
        }
    }

    /// Delivers one serialized frame to a session's socket. Frames for gone
    /// sessions are dropped, as are frames for slow consumers.
    pub fn send(&self, session_id: &str, frame_json: String) {
        let sessions = self.read();
        if let Some(SessionHandle {
            sender: Some(sender),
            ..
        }) = sessions.get(session_id)
        {
            if let Err(e) = sender.try_send(frame_json) {
                tracing::warn!(
                    session_id = %session_id,
                    "dropping frame for slow consumer: {}",
                    e
                );
            }
        }
    }

    pub fn is_attached(&self, session_id: &str) -> bool {
        self.read()
            .get(session_id)
            .is_some_and(|handle| handle.sender.is_some())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionMap> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionMap> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Event sink that resolves the session's current socket at delivery time,
/// so a turn started before a reconnect delivers to the new socket and a
/// turn whose client is gone delivers nowhere.
pub struct RegistrySink {
    registry: SessionRegistry,
    session_id: String,
}

impl RegistrySink {
    pub fn new(registry: SessionRegistry, session_id: impl Into<String>) -> Self {
        Self {
            registry,
            session_id: session_id.into(),
        }
    }
}

impl EventSink for RegistrySink {
    fn deliver(&self, frame: ServerFrame) {
        match serde_json::to_string(&frame) {
            Ok(json) => self.registry.send(&self.session_id, json),
            Err(error) => tracing::error!(%error, "failed to serialize server frame"),
        }
    }
}

/// Query parameters for the WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    /// Session to re-attach to; a fresh session is created when absent.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// WebSocket handler: `GET /ws` or `GET /ws?sessionId=...` to resume.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let (session_id, resumed) = match params.session_id.filter(|s| !s.trim().is_empty()) {
        Some(id) => (id, true),
        None => (Uuid::new_v4().to_string(), false),
    };
    tracing::info!(session_id = %session_id, resumed, "websocket connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    // Bounded: a slow consumer gets frames dropped rather than buffered
    // without limit.
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let connection_id = state.registry.attach(&session_id, tx);

    let mut send_task = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if ws_tx.send(AxumMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_session = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                AxumMessage::Text(text) => {
                    handle_client_frame(&recv_state, &recv_session, &text);
                }
                AxumMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half stops first takes the other down with it.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.detach(&session_id, connection_id);
    tracing::info!(session_id = %session_id, "websocket disconnected");

    // Destroy the session unless the client reconnects within the timeout.
    let timeout = Duration::from_secs(state.disconnect_timeout_secs);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if state.registry.remove_if_detached(&session_id, connection_id) {
            state.orchestrator.remove_session(&session_id).await;
            tracing::info!(session_id = %session_id, "session destroyed after disconnect timeout");
        }
    });
}

/// Decodes one client frame and spawns its orchestration turn. One task per
/// in-flight turn; per-session interleaving is bounded by the orchestrator's
/// session permits, not by the socket loop.
fn handle_client_frame(state: &Arc<AppState>, session_id: &str, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!(session_id = %session_id, %error, "undecodable client frame");
            // A frame that never parsed is a transport problem, not a
            // pipeline one; it has no orchestration-taxonomy counterpart.
            send_error(state, session_id, "invalid_frame", "unrecognized frame");
            return;
        }
    };

    match frame {
        ClientFrame::VoiceInput {
            audio,
            format,
            duration_ms,
        } => {
            let data = match BASE64.decode(audio.as_bytes()) {
                Ok(data) => data,
                Err(error) => {
                    tracing::warn!(session_id = %session_id, %error, "invalid base64 audio");
                    let rejection =
                        OrchestrationError::InvalidAudio("audio is not valid base64".to_string());
                    send_error(state, session_id, rejection.code(), &rejection.to_string());
                    return;
                }
            };
            let mut input = AudioInput::new(data, format);
            input.duration_ms = duration_ms;

            let orchestrator = state.orchestrator.clone();
            let sink = RegistrySink::new(state.registry.clone(), session_id);
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                orchestrator
                    .handle_voice_input(&session_id, input, &sink)
                    .await;
            });
        }
        ClientFrame::TextInput { text } => {
            let orchestrator = state.orchestrator.clone();
            let sink = RegistrySink::new(state.registry.clone(), session_id);
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                let turn = orchestrator.handle_text_input(&session_id, &text).await;
                sink.deliver(ServerFrame::AiResponse(ellery_types::AiResponsePayload {
                    text: turn.response,
                    audio_buffer: String::new(),
                    confidence: 0.0,
                    processing_time: turn.processing_time_ms,
                    provider: turn.provider,
                }));
            });
        }
    }
}

fn send_error(state: &Arc<AppState>, session_id: &str, code: &str, message: &str) {
    let frame = ServerFrame::Error(ErrorPayload {
        code: code.to_string(),
        message: message.to_string(),
        details: None,
        timestamp: Utc::now(),
        request_id: Uuid::new_v4().to_string(),
    });
    RegistrySink::new(state.registry.clone(), session_id).deliver(frame);
}
