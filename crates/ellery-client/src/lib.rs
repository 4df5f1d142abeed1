//! Client-side voice pipeline: microphone capture, session transport, and
//! the degradation supervisor that swaps the session to text mode when the
//! voice path suffers an unrecoverable fault.
//!
//! Everything here is UI-agnostic. The capture controller is an explicit
//! state machine over an injected device, the transport delivers typed frames
//! to subscribers over channels, and the supervisor owns the voice/text mode
//! switch. A UI layer consumes these through their event surfaces.

pub mod capture;
pub mod supervisor;
pub mod transport;

pub use capture::{CaptureController, CaptureDevice, CaptureNotice, CapturePoll};
pub use supervisor::{DegradationSupervisor, InputMode, PipelineFault, TextChannel, TextReply};
pub use transport::{ClientTransport, EventKind, ReconnectSchedule, Subscription, TransportConfig, TransportEvent};
