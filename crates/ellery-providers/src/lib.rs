//! Upstream provider collaborators for the response pipeline.
//!
//! Defines the async seams the orchestrator talks through — [`Transcriber`],
//! [`Generator`], [`Synthesizer`] — plus HTTP implementations against
//! OpenAI-compatible endpoints and the always-available [`FallbackService`].
//!
//! Providers are explicitly constructed and injected; there are no
//! module-level singletons. Timeout enforcement lives in the orchestrator so
//! every implementation is bounded the same way.

pub mod fallback;
pub mod http;
pub mod traits;

pub use fallback::{FallbackContext, FallbackService};
pub use http::{HttpGenerator, HttpSynthesizer, HttpTranscriber, ProviderEndpoint};
pub use traits::{Generator, ProviderError, Synthesizer, Transcriber, Transcript};
