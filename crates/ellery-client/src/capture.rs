//! Microphone lifecycle and the recording state machine.
//!
//! The controller is an explicit FSM over an injected [`CaptureDevice`], so
//! the whole lifecycle is testable with a scripted device and independent of
//! any UI binding. State lives in one place and is mutated only by controller
//! methods.

use ellery_types::{AudioFormat, AudioInput, CaptureError, VoiceState};
use std::time::{Duration, Instant};

/// Hard ceiling on one recording, to bound resource use.
pub const RECORDING_CEILING: Duration = Duration::from_secs(30);

/// Abstraction over the platform microphone.
///
/// Acquire and release must be symmetric; the controller guarantees exactly
/// one release per successful acquire, including on drop.
pub trait CaptureDevice: Send {
    /// Takes exclusive hold of the device. Fails without side effects.
    fn acquire(&mut self) -> Result<(), CaptureError>;

    /// Pulls the next chunk of captured audio. May return an empty chunk
    /// when no new samples are ready.
    fn read_chunk(&mut self) -> Result<Vec<u8>, CaptureError>;

    /// Releases the device. Must be safe to call exactly once per acquire.
    fn release(&mut self);

    /// Container format of the chunks this device produces.
    fn format(&self) -> AudioFormat;
}

/// User-visible notices from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureNotice {
    /// Recording hit the ceiling and was terminated; the accumulated audio
    /// was still emitted.
    RecordingLimitReached,
}

/// Outcome of one [`CaptureController::poll`] call while listening.
#[derive(Debug)]
pub enum CapturePoll {
    /// Still recording; keep polling.
    Recording,
    /// The ceiling terminated the recording. The audio accumulated so far is
    /// emitted and the notice should be surfaced to the user.
    Terminated(AudioInput, CaptureNotice),
}

/// Owns the recording state machine.
///
/// Transitions: IDLE→LISTENING on `start_capture`, LISTENING→PROCESSING on
/// `stop_capture` (or the ceiling), PROCESSING→SPEAKING when a response with
/// audio arrives, SPEAKING→IDLE when playback completes, any→ERROR on an
/// unrecoverable fault, ERROR→IDLE on explicit retry.
pub struct CaptureController<D: CaptureDevice> {
    device: D,
    state: VoiceState,
    buffer: Vec<u8>,
    started_at: Option<Instant>,
    ceiling: Duration,
    holding_device: bool,
}

impl<D: CaptureDevice> CaptureController<D> {
    pub fn new(device: D) -> Self {
        Self::with_ceiling(device, RECORDING_CEILING)
    }

    /// Ceiling override, for deployments (and tests) that want a different
    /// bound.
    pub fn with_ceiling(device: D, ceiling: Duration) -> Self {
        Self {
            device,
            state: VoiceState::Idle,
            buffer: Vec::new(),
            started_at: None,
            ceiling,
            holding_device: false,
        }
    }

    pub fn current_state(&self) -> VoiceState {
        self.state
    }

    /// IDLE→LISTENING. Acquires the device; on failure the state is
    /// unchanged and the error is returned for the UI to surface.
    pub fn start_capture(&mut self) -> Result<(), CaptureError> {
        if self.state != VoiceState::Idle {
            return Err(CaptureError::DeviceBusy);
        }
        self.device.acquire()?;
        self.holding_device = true;
        self.buffer.clear();
        self.started_at = Some(Instant::now());
        self.state = VoiceState::Listening;
        tracing::debug!("capture started");
        Ok(())
    }

    /// Pulls pending audio while LISTENING and enforces the recording
    /// ceiling. Returns the terminated recording when the ceiling is hit.
    pub fn poll(&mut self) -> Result<CapturePoll, CaptureError> {
        if self.state != VoiceState::Listening {
            return Ok(CapturePoll::Recording);
        }

        match self.device.read_chunk() {
            Ok(chunk) => self.buffer.extend_from_slice(&chunk),
            Err(error) => {
                self.fail();
                return Err(error);
            }
        }

        let elapsed = self
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        if elapsed >= self.ceiling {
            tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "recording ceiling reached");
            let audio = self.take_recording();
            self.state = VoiceState::Processing;
            return Ok(CapturePoll::Terminated(
                audio,
                CaptureNotice::RecordingLimitReached,
            ));
        }

        Ok(CapturePoll::Recording)
    }

    /// LISTENING→PROCESSING. Returns the accumulated audio; empty recordings
    /// are discarded silently and the controller returns to IDLE.
    pub fn stop_capture(&mut self) -> Option<AudioInput> {
        if self.state != VoiceState::Listening {
            return None;
        }
        let audio = self.take_recording();
        if audio.is_empty() {
            self.state = VoiceState::Idle;
            return None;
        }
        self.state = VoiceState::Processing;
        Some(audio)
    }

    /// PROCESSING→SPEAKING, when a response with audio arrives.
    pub fn response_arrived(&mut self) {
        if self.state == VoiceState::Processing {
            self.state = VoiceState::Speaking;
        }
    }

    /// SPEAKING→IDLE, when playback completes.
    pub fn playback_complete(&mut self) {
        if self.state == VoiceState::Speaking {
            self.state = VoiceState::Idle;
        }
    }

    /// Any state→ERROR, on an unrecoverable device or transport fault. The
    /// device is released if held.
    pub fn fail(&mut self) {
        self.release_device();
        self.state = VoiceState::Error;
    }

    /// ERROR→IDLE, on explicit user retry.
    pub fn retry(&mut self) {
        if self.state == VoiceState::Error {
            self.state = VoiceState::Idle;
        }
    }

    fn take_recording(&mut self) -> AudioInput {
        self.release_device();
        let elapsed = self.started_at.take().map(|t| t.elapsed());
        let mut audio = AudioInput::new(std::mem::take(&mut self.buffer), self.device.format());
        audio.duration_ms = elapsed.map(|d| d.as_millis() as u64);
        audio
    }

    fn release_device(&mut self) {
        if self.holding_device {
            self.device.release();
            self.holding_device = false;
        }
    }
}

impl<D: CaptureDevice> Drop for CaptureController<D> {
    fn drop(&mut self) {
        // Abnormal termination still releases the device exactly once.
        self.release_device();
    }
}
