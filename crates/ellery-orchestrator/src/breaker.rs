//! Per-provider circuit breaker.
//!
//! Counts consecutive failures; at the threshold the circuit opens and calls
//! are skipped until the recovery timeout elapses, after which one trial call
//! is let through. A successful trial closes the circuit, a failed one
//! re-opens it for another full recovery period. This keeps a sustained
//! outage from charging every turn the provider's full stage timeout.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// A recovery trial is in flight; hold further calls until its outcome.
    probing: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
                probing: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may proceed. While open, returns `false` until the
    /// recovery timeout elapses, then admits exactly one trial call.
    pub fn allow(&self) -> bool {
        let mut state = self.lock();
        match state.opened_at {
            None => true,
            Some(opened_at) => {
                if state.probing || opened_at.elapsed() < self.recovery_timeout {
                    false
                } else {
                    state.probing = true;
                    true
                }
            }
        }
    }

    /// Records a successful call: the circuit closes and the failure count
    /// resets.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.opened_at.is_some() {
            tracing::info!("circuit closed after successful trial call");
        }
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probing = false;
    }

    /// Records a failed call. A failed trial re-opens the circuit for another
    /// full recovery period; otherwise failures accumulate toward the
    /// threshold.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        if state.probing {
            state.probing = false;
            state.opened_at = Some(Instant::now());
            tracing::warn!("trial call failed, circuit re-opened");
            return;
        }
        state.consecutive_failures += 1;
        if state.opened_at.is_none() && state.consecutive_failures >= self.failure_threshold {
            state.opened_at = Some(Instant::now());
            tracing::warn!(
                failures = state.consecutive_failures,
                "failure threshold reached, circuit opened"
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().opened_at.is_some()
    }
}
