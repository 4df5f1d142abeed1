//! Shared types, error definitions, and constants for the Ellery platform.
//!
//! This crate provides the foundational types used across all Ellery crates:
//! the session and message data model, audio payload types, the WebSocket
//! event envelopes, and the domain error taxonomy (via `thiserror`).
//!
//! No crate in the workspace depends on anything *except* `ellery-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod audio;
pub mod error;
pub mod events;
pub mod session;

use serde::{Deserialize, Serialize};

pub use audio::{AudioFormat, AudioInput, AudioResponse, MAX_AUDIO_BYTES};
pub use error::{CacheError, CaptureError, OrchestrationError, TransportError};
pub use events::{AiResponsePayload, ClientFrame, ErrorPayload, ServerFrame, TransportNotice};
pub use session::{ConnectionState, Message, MessageMeta, Role, Session, VoiceState};

/// Complexity class assigned to a transcript, used for provider routing.
///
/// Derived per turn from transcript features and never persisted beyond it.
/// Ordering matters: `Simple < Moderate < Complex`, and ties during
/// classification resolve toward the cheaper (lower) class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityClass {
    /// Short greeting / smalltalk; routed to the fast provider.
    Simple,
    /// Everything that is neither clearly simple nor clearly complex.
    Moderate,
    /// Domain-specific, multi-clause queries; routed to the accurate provider.
    Complex,
}

impl ComplexityClass {
    /// Returns the string label for this class.
    pub fn label(self) -> &'static str {
        match self {
            Self::Simple => "SIMPLE",
            Self::Moderate => "MODERATE",
            Self::Complex => "COMPLEX",
        }
    }
}

/// Which inference backend produced a response.
///
/// Carried in message metadata so a client can tell a degraded (fallback)
/// turn apart from a normal one; the event shape is otherwise identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Low-latency generation backend (simple/moderate turns).
    Fast,
    /// Higher-latency, higher-quality backend (complex turns).
    Accurate,
    /// Canned output from the fallback service.
    Fallback,
}

impl ProviderKind {
    /// Returns the string label for this provider.
    pub fn label(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Accurate => "accurate",
            Self::Fallback => "fallback",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_class_orders_cheapest_first() {
        assert!(ComplexityClass::Simple < ComplexityClass::Moderate);
        assert!(ComplexityClass::Moderate < ComplexityClass::Complex);
    }

    #[test]
    fn complexity_class_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ComplexityClass::Moderate).unwrap();
        assert_eq!(json, "\"MODERATE\"");
    }

    #[test]
    fn provider_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ProviderKind::Fallback).unwrap();
        assert_eq!(json, "\"fallback\"");
    }
}
