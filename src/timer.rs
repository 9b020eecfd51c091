//! # Timer State Machine
//!
//! DESIGN NOTES §9: a small `{inactive, backoff, holdoff}` state machine
//! with an explicit `repeat_count`, replacing the original's
//! inheritance-based listener callbacks. Callers drive it with `fire()`
//! at expiry and interpret the returned `TimerPhase` to decide what to do
//! next; no function pointer or opaque context is stored here — the
//! owning component (repair engine, CC feedback, activity timer) matches
//! on the phase itself.

use std::time::Duration;

/// Current phase of a `Timer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Inactive,
    Backoff,
    Holdoff,
}

/// A three-phase, single-shot-per-phase timer.
///
/// Mirrors the repair timer (§4.5), cc timer (§4.7), ack timer (§4.8), and
/// activity timer (§4.8) — all of which are this same state machine with
/// different interval/repeat semantics layered on top.
#[derive(Debug, Clone)]
pub struct Timer {
    phase: TimerPhase,
    interval: Duration,
    repeat_count: i32,
}

impl Timer {
    /// Create an inactive timer.
    pub fn new() -> Self {
        Timer {
            phase: TimerPhase::Inactive,
            interval: Duration::ZERO,
            repeat_count: 0,
        }
    }

    /// Arm the timer into `Backoff` with the given interval. `repeat_count`
    /// defaults to 1 (one backoff shot, then optionally a holdoff shot),
    /// matching the repair timer's `idle -> backoff(repeat=1) -> holdoff(repeat=0) -> idle`.
    pub fn activate_backoff(&mut self, interval: Duration) {
        self.phase = TimerPhase::Backoff;
        self.interval = interval;
        self.repeat_count = 1;
    }

    /// Arm the timer into `Holdoff` with the given interval and `repeat_count = 0`.
    pub fn activate_holdoff(&mut self, interval: Duration) {
        self.phase = TimerPhase::Holdoff;
        self.interval = interval;
        self.repeat_count = 0;
    }

    /// Deactivate the timer. Idempotent.
    pub fn deactivate(&mut self) {
        self.phase = TimerPhase::Inactive;
        self.repeat_count = 0;
    }

    /// Reschedule the currently-armed timer to a new interval. No-op if inactive.
    pub fn set_interval(&mut self, interval: Duration) {
        if self.phase != TimerPhase::Inactive {
            self.interval = interval;
        }
    }

    pub fn set_repeat(&mut self, repeat: i32) {
        self.repeat_count = repeat;
    }

    pub fn decrement_repeat(&mut self) -> i32 {
        self.repeat_count = self.repeat_count.saturating_sub(1);
        self.repeat_count
    }

    pub fn is_active(&self) -> bool {
        self.phase != TimerPhase::Inactive
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn repeat_count(&self) -> i32 {
        self.repeat_count
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
