//! Server-side response orchestrator.
//!
//! Turns one captured utterance into one delivered reply: validate the audio,
//! transcribe it, classify the transcript, route generation to the fast or
//! accurate backend, synthesize speech, and emit progress plus exactly one
//! terminal event. Every upstream call is timeout-bounded and every failure
//! enters the fallback chain instead of surfacing to the client raw.
//!
//! Collaborators are injected at construction; nothing here reaches for
//! globals, which keeps the whole pipeline drivable by scripted doubles.

mod breaker;
pub mod config;
mod pipeline;

pub use config::OrchestratorConfig;
pub use pipeline::{Collaborators, EventSink, Orchestrator, TextTurn};
