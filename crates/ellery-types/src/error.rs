//! Domain error taxonomy.
//!
//! Capture and transport errors are recoverable locally and surfaced as
//! user-actionable status. Orchestration provider errors feed the fallback
//! chain and only reach the user if the fallback itself cannot answer.
//! Cache errors are treated as misses and never surfaced.

use thiserror::Error;

/// Failures acquiring or using the capture device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("capture device unavailable")]
    DeviceUnavailable,

    #[error("capture device is busy")]
    DeviceBusy,

    #[error("audio capture is not supported in this environment")]
    Unsupported,
}

/// Failures on the session transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Sending while not connected fails fast rather than silently queuing.
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport operation timed out")]
    Timeout,

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),
}

/// Failures inside the response pipeline.
///
/// Each variant maps to a stable wire code via [`OrchestrationError::code`].
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("provider '{provider}' timed out after {timeout_ms} ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("classification failed: {0}")]
    ClassificationFailure(String),
}

impl OrchestrationError {
    /// Stable machine-readable code for the `error` wire frame.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAudio(_) => "invalid_audio",
            Self::ProviderTimeout { .. } => "provider_timeout",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ClassificationFailure(_) => "classification_failure",
        }
    }
}

/// Failures inside the response cache.
///
/// Callers treat any cache error as a miss; it is logged and never surfaced
/// to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestration_codes_are_stable() {
        assert_eq!(
            OrchestrationError::InvalidAudio("empty".into()).code(),
            "invalid_audio"
        );
        assert_eq!(
            OrchestrationError::ProviderTimeout {
                provider: "fast".into(),
                timeout_ms: 100
            }
            .code(),
            "provider_timeout"
        );
    }

    #[test]
    fn capture_errors_display_user_actionable_text() {
        assert_eq!(
            CaptureError::DeviceBusy.to_string(),
            "capture device is busy"
        );
    }
}
