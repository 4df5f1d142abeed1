//! Client half of the session transport.
//!
//! Wraps a tokio-tungstenite connection in a typed event surface: decoded
//! [`ServerFrame`]s and [`TransportNotice`]s are fanned out to registered
//! subscribers, sends fail fast when the socket is down, and unexpected
//! disconnects drive an exponential-backoff reconnect loop with a bounded
//! attempt count. Ordering holds within one connection instance only; a
//! reconnect may lose in-flight sends, and callers treat unanswered requests
//! as timed out.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ellery_types::{
    AudioInput, ClientFrame, ConnectionState, ServerFrame, TransportError, TransportNotice,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Connection endpoint and reconnection policy.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub url: String,
    /// First reconnect delay; each attempt doubles it.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Ceiling on any single reconnect delay.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Consecutive failed attempts before the transport gives up (FAILED).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

/// Exponential-backoff attempt bookkeeping, separated from the socket so the
/// reconnection bound is testable without a network.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
            config.max_reconnect_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once the bound is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    /// 1-based number of the attempt most recently handed out.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Which events a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    AiResponse,
    Error,
    /// Connection lifecycle notices.
    Lifecycle,
}

/// One delivered event.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Frame(ServerFrame),
    Notice(TransportNotice),
}

impl TransportEvent {
    fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Frame(ServerFrame::Status { .. }) => EventKind::Status,
            TransportEvent::Frame(ServerFrame::AiResponse(_)) => EventKind::AiResponse,
            TransportEvent::Frame(ServerFrame::Error(_)) => EventKind::Error,
            TransportEvent::Notice(_) => EventKind::Lifecycle,
        }
    }
}

type Handler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

struct StateCell {
    connection: ConnectionState,
    last_error: Option<String>,
}

struct TransportInner {
    config: TransportConfig,
    state: Mutex<StateCell>,
    handlers: Mutex<HashMap<u64, (EventKind, Handler)>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    next_handler_id: AtomicU64,
    reconnecting: AtomicBool,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TransportInner {
    fn set_state(&self, connection: ConnectionState) {
        relock(&self.state).connection = connection;
    }

    fn set_error(&self, error: String) {
        relock(&self.state).last_error = Some(error);
    }

    /// Fans one event out to every matching subscriber. A panicking handler
    /// is isolated; the rest still receive the event.
    fn dispatch(&self, event: &TransportEvent) {
        let kind = event.kind();
        let matching: Vec<Handler> = relock(&self.handlers)
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in matching {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(?kind, "event subscriber panicked");
            }
        }
    }

    fn on_disconnect(self: &Arc<Self>, reason: String) {
        relock(&self.outbound).take();
        self.set_state(ConnectionState::Disconnected);
        self.set_error(reason.clone());
        self.dispatch(&TransportEvent::Notice(TransportNotice::Disconnected {
            reason,
        }));
        self.spawn_reconnect(ReconnectSchedule::from_config(&self.config));
    }

    fn spawn_reconnect(self: &Arc<Self>, schedule: ReconnectSchedule) {
        // One reconnect loop at a time.
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = self.clone();
        tokio::spawn(async move {
            run_reconnect(inner, schedule).await;
        });
    }
}

async fn run_reconnect(inner: Arc<TransportInner>, mut schedule: ReconnectSchedule) {
    loop {
        let Some(delay) = schedule.next_delay() else {
            inner.set_state(ConnectionState::Failed);
            inner.dispatch(&TransportEvent::Notice(TransportNotice::ReconnectFailed));
            tracing::warn!(
                attempts = schedule.attempt(),
                "reconnect attempts exhausted, transport failed"
            );
            break;
        };
        inner.set_state(ConnectionState::Reconnecting);
        inner.dispatch(&TransportEvent::Notice(TransportNotice::ReconnectAttempt {
            attempt: schedule.attempt(),
        }));
        tokio::time::sleep(delay).await;

        match connect_async(inner.config.url.as_str()).await {
            Ok((stream, _)) => {
                // Clear the guard before the reader task can observe a drop
                // of the new socket; otherwise its reconnect attempt would be
                // swallowed and the transport would sit disconnected with
                // attempts remaining.
                inner.reconnecting.store(false, Ordering::Release);
                install(inner.clone(), stream);
                inner.set_state(ConnectionState::Connected);
                inner.dispatch(&TransportEvent::Notice(TransportNotice::Reconnected {
                    attempt: schedule.attempt(),
                }));
                return;
            }
            Err(error) => {
                tracing::warn!(attempt = schedule.attempt(), %error, "reconnect attempt failed");
                inner.set_error(error.to_string());
            }
        }
    }
    inner.reconnecting.store(false, Ordering::Release);
}

/// Splits the socket into a writer fed by the outbound channel and a reader
/// that decodes and dispatches frames until the connection drops.
fn install(inner: Arc<TransportInner>, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    *relock(&inner.outbound) = Some(tx);
    let (mut sink, mut source) = stream.split();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let reason = loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(text.as_ref()) {
                        Ok(frame) => inner.dispatch(&TransportEvent::Frame(frame)),
                        Err(error) => {
                            tracing::warn!(%error, "dropping undecodable server frame");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) => break "closed by server".to_string(),
                Some(Ok(_)) => {}
                Some(Err(error)) => break error.to_string(),
                None => break "connection ended".to_string(),
            }
        };
        inner.on_disconnect(reason);
    });
}

/// Handle returned by [`ClientTransport::on`]; consuming it removes the
/// handler.
pub struct Subscription {
    inner: Arc<TransportInner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        relock(&self.inner.handlers).remove(&self.id);
    }
}

/// The client session transport.
#[derive(Clone)]
pub struct ClientTransport {
    inner: Arc<TransportInner>,
}

impl ClientTransport {
    /// Creates a disconnected transport; call [`connect`](Self::connect) to
    /// open the socket.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                config,
                state: Mutex::new(StateCell {
                    connection: ConnectionState::Disconnected,
                    last_error: None,
                }),
                handlers: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                next_handler_id: AtomicU64::new(0),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        relock(&self.inner.state).connection
    }

    pub fn last_error(&self) -> Option<String> {
        relock(&self.inner.state).last_error.clone()
    }

    /// Opens the socket. On failure the transport stays DISCONNECTED; no
    /// automatic retry happens for the initial connect.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.inner.set_state(ConnectionState::Connecting);
        match connect_async(self.inner.config.url.as_str()).await {
            Ok((stream, _)) => {
                install(self.inner.clone(), stream);
                self.inner.set_state(ConnectionState::Connected);
                self.inner
                    .dispatch(&TransportEvent::Notice(TransportNotice::Connected));
                Ok(())
            }
            Err(error) => {
                self.inner.set_state(ConnectionState::Disconnected);
                self.inner.set_error(error.to_string());
                Err(TransportError::NotConnected)
            }
        }
    }

    /// Sends one frame. Fails fast with [`TransportError::NotConnected`]
    /// rather than queuing while the socket is down.
    pub fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let text = serde_json::to_string(frame).map_err(|_| TransportError::NotConnected)?;
        let guard = relock(&self.inner.outbound);
        match guard.as_ref() {
            Some(sender) if sender.send(WsMessage::text(text)).is_ok() => Ok(()),
            _ => Err(TransportError::NotConnected),
        }
    }

    /// Convenience for the capture path: wraps one utterance in a
    /// `voice-input` frame with base64 audio.
    pub fn send_voice(&self, audio: &AudioInput) -> Result<(), TransportError> {
        self.send(&ClientFrame::VoiceInput {
            audio: BASE64.encode(&audio.data),
            format: audio.format,
            duration_ms: audio.duration_ms,
        })
    }

    /// Registers a handler for one event kind. Multiple independent handlers
    /// per kind are supported and isolated from each other's panics.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&TransportEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        relock(&self.inner.handlers).insert(id, (kind, Arc::new(handler)));
        Subscription {
            inner: self.inner.clone(),
            id,
        }
    }

    /// Leaves FAILED (or DISCONNECTED) by starting a fresh reconnect loop
    /// with a reset attempt counter. The only way out of FAILED.
    pub fn force_reconnect(&self) {
        match self.state() {
            ConnectionState::Failed | ConnectionState::Disconnected => {
                self.inner
                    .spawn_reconnect(ReconnectSchedule::from_config(&self.inner.config));
            }
            _ => {}
        }
    }
}
