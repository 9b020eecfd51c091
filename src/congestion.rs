//! # Congestion-Control Feedback (C7)
//!
//! Receive-rate tracking, the TFRC rate equation, CC-probe response, and
//! overheard-feedback suppression (spec.md §4.7). Grounded on the
//! teacher's per-link controller struct with a `tick()`-shaped update
//! method (`BiscayController`), though the rate math itself is TFRC, taken
//! from `original_source`'s `NormSession::CalculateRate` and the
//! surrounding backoff-ratio clamp in `normNode.cpp`.

use quanta::Instant;

use crate::message::CcFeedback;
use crate::rand_util::exponential_rand;
use crate::timer::Timer;

/// Minimum measurement tick, floor for the receive-rate update interval
/// (spec.md §4.7: "clamped to at least `NORM_TICK_MIN`").
pub const NORM_TICK_MIN: f64 = 0.01;

/// Tracks this sender's receive rate and CC state as seen by one receiver.
#[derive(Debug, Clone)]
pub struct CongestionController {
    pub cc_enable: bool,
    pub is_clr: bool,
    pub is_plr: bool,
    pub slow_start: bool,
    pub cc_sequence: u16,
    pub cc_feedback_needed: bool,

    pub send_rate: f64,
    pub recv_rate: f64,
    pub recv_rate_prev: f64,
    pub nominal_packet_size: f64,
    bytes_accum: f64,
    prev_update_time: Option<Instant>,

    /// Two-phase backoff/holdoff timer for the deferred CC(CMD) response
    /// (§4.7), distinct from the repair timer.
    pub cc_timer: Timer,
}

impl CongestionController {
    pub fn new() -> Self {
        CongestionController {
            cc_enable: false,
            is_clr: false,
            is_plr: false,
            slow_start: true,
            cc_sequence: 0,
            cc_feedback_needed: false,
            send_rate: 0.0,
            recv_rate: 0.0,
            recv_rate_prev: 0.0,
            nominal_packet_size: 0.0,
            bytes_accum: 0.0,
            prev_update_time: None,
            cc_timer: Timer::new(),
        }
    }

    /// Receive-rate update on every received message of size `s` (§4.7
    /// bullet 1).
    pub fn on_message_received(
        &mut self,
        now: Instant,
        size: usize,
        grtt: f64,
        rtt: Option<f64>,
        rtt_confirmed: bool,
    ) {
        let s = size as f64;
        let Some(prev) = self.prev_update_time else {
            self.prev_update_time = Some(now);
            self.recv_rate = 0.0;
            self.nominal_packet_size = s;
            return;
        };

        let interval = now.duration_since(prev).as_secs_f64();
        self.bytes_accum += s;

        let base_interval = if rtt_confirmed {
            rtt.unwrap_or(grtt)
        } else {
            grtt
        };
        let mut measurement_interval = base_interval.max(NORM_TICK_MIN);
        if self.recv_rate > 0.0 {
            measurement_interval =
                measurement_interval.max(4.0 * self.nominal_packet_size / self.recv_rate);
        }

        if interval >= measurement_interval {
            let rate = self.bytes_accum / interval;
            self.recv_rate = rate;
            self.recv_rate_prev = rate;
            self.bytes_accum = 0.0;
            self.prev_update_time = Some(now);
        } else if self.recv_rate == 0.0 {
            self.recv_rate = self.bytes_accum / interval.max(f64::EPSILON);
        } else if self.slow_start {
            let current = self.bytes_accum / interval.max(f64::EPSILON);
            let slewed = self.recv_rate_prev
                + (interval / measurement_interval) * (current - self.recv_rate_prev);
            if slewed > self.recv_rate {
                self.recv_rate = slewed;
            }
        }

        self.nominal_packet_size += 0.05 * (s - self.nominal_packet_size);
    }

    /// TFRC rate equation (§4.7): `rate = s / (r*sqrt(2p/3) + RTO*(3*sqrt(3p/8))*p*(1+32p^2))`.
    pub fn calculate_rate(segment_size: f64, rtt: f64, loss: f64) -> f64 {
        if rtt <= 0.0 {
            return segment_size.max(0.0);
        }
        let p = loss.clamp(0.0, 1.0);
        if p <= 0.0 {
            // No observed loss: rate is effectively unbounded by the
            // equation; callers fall back to 2x recv_rate (§4.5 step 2).
            return f64::INFINITY;
        }
        let rto = 4.0 * rtt;
        let denom = rtt * (2.0 * p / 3.0).sqrt()
            + rto * (3.0 * (3.0 * p / 8.0).sqrt()) * p * (1.0 + 32.0 * p * p);
        if denom <= 0.0 {
            f64::INFINITY
        } else {
            segment_size / denom
        }
    }

    /// Whether to answer a CC probe immediately (`OnCCTimeout`) or schedule
    /// a randomized backoff first (§4.7 "CC response to CMD(CC)").
    pub fn cc_probe_response(&self, unicast: bool) -> CcProbeResponse {
        if self.is_clr || self.is_plr || unicast {
            CcProbeResponse::RespondNow
        } else {
            CcProbeResponse::Backoff
        }
    }

    /// Randomized backoff interval for a deferred CC response (§4.7).
    pub fn cc_backoff_interval(&self, local_rate: f64, max_backoff: f64, group_size: f64) -> f64 {
        if self.send_rate <= 0.0 {
            return exponential_rand(max_backoff, group_size);
        }
        let r = (local_rate / self.send_rate).clamp(0.5, 0.9);
        let normalized = (r - 0.5) / 0.4;
        0.25 * normalized * max_backoff + 0.75 * exponential_rand(max_backoff, group_size)
    }

    /// Overheard-feedback suppression (§4.7 `HandleCCFeedback`): returns
    /// `true` if this receiver's own CC response should be suppressed.
    pub fn is_suppressed_by_peer(
        own_rate: f64,
        own_rtt_confirmed: bool,
        peer_rate: f64,
        peer_rtt_confirmed: bool,
    ) -> bool {
        if own_rtt_confirmed {
            own_rate > 0.9 * peer_rate
        } else {
            peer_rtt_confirmed || own_rate <= 0.9 * peer_rate
        }
    }

    /// Holdoff interval for the CC timer after responding (§4.7: `grtt *
    /// backoff_factor`), skipped entirely for CLR/PLR/unicast per the CC
    /// timer's two-phase description.
    pub fn cc_holdoff_interval(&self, grtt: f64, backoff_factor: f64, unicast: bool) -> Option<f64> {
        if self.is_clr || self.is_plr || unicast {
            None
        } else {
            Some(grtt * backoff_factor)
        }
    }
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a CC-feedback extension from a receiver's current rate/loss/RTT
/// state (§4.5 step 2, §4.7 ACK(CC)): zero observed loss reports the START
/// flag and twice the receive rate, matching `calculate_rate`'s unbounded
/// zero-loss case.
pub fn cc_feedback(rtt_quantized: u8, loss: f64, recv_rate: f64, cc_sequence: u16) -> CcFeedback {
    let loss_zero = loss <= 0.0;
    CcFeedback {
        rtt_quantized,
        loss_quantized: crate::message::quantize_loss(loss),
        rate_quantized: crate::message::quantize_rate(if loss_zero { 2.0 * recv_rate } else { recv_rate }),
        cc_sequence,
        start: loss_zero,
    }
}

/// Result of `cc_probe_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcProbeResponse {
    RespondNow,
    Backoff,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn advance(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    // ─── Receive-rate update ───

    #[test]
    fn first_message_seeds_state_with_zero_rate() {
        let mut cc = CongestionController::new();
        let now = Instant::now();
        cc.on_message_received(now, 1000, 0.1, None, false);
        assert_eq!(cc.recv_rate, 0.0);
    }

    #[test]
    fn second_message_within_interval_computes_rate() {
        let mut cc = CongestionController::new();
        let t0 = Instant::now();
        cc.on_message_received(t0, 1000, 0.1, None, false);
        let t1 = advance(t0, 0.2);
        cc.on_message_received(t1, 1000, 0.1, None, false);
        assert!(cc.recv_rate > 0.0);
    }

    #[test]
    fn nominal_packet_size_tracks_ewma() {
        let mut cc = CongestionController::new();
        let t0 = Instant::now();
        cc.on_message_received(t0, 1000, 0.1, None, false);
        assert_eq!(cc.nominal_packet_size, 1000.0);
        let t1 = advance(t0, 0.2);
        cc.on_message_received(t1, 2000, 0.1, None, false);
        assert!(cc.nominal_packet_size > 1000.0 && cc.nominal_packet_size < 2000.0);
    }

    // ─── TFRC rate equation ───

    #[test]
    fn zero_loss_is_effectively_unbounded() {
        let r = CongestionController::calculate_rate(1000.0, 0.1, 0.0);
        assert!(r.is_infinite());
    }

    #[test]
    fn rate_decreases_as_loss_increases() {
        let low = CongestionController::calculate_rate(1000.0, 0.1, 0.01);
        let high = CongestionController::calculate_rate(1000.0, 0.1, 0.1);
        assert!(high < low);
    }

    #[test]
    fn rate_decreases_as_rtt_increases() {
        let fast = CongestionController::calculate_rate(1000.0, 0.05, 0.05);
        let slow = CongestionController::calculate_rate(1000.0, 0.5, 0.05);
        assert!(slow < fast);
    }

    // ─── CC probe response / suppression ───

    #[test]
    fn clr_responds_immediately() {
        let mut cc = CongestionController::new();
        cc.is_clr = true;
        assert_eq!(cc.cc_probe_response(false), CcProbeResponse::RespondNow);
    }

    #[test]
    fn non_clr_multicast_backs_off() {
        let cc = CongestionController::new();
        assert_eq!(cc.cc_probe_response(false), CcProbeResponse::Backoff);
    }

    #[test]
    fn unicast_always_responds_immediately() {
        let cc = CongestionController::new();
        assert_eq!(cc.cc_probe_response(true), CcProbeResponse::RespondNow);
    }

    #[test]
    fn confirmed_rtt_suppressed_when_own_rate_much_higher() {
        assert!(CongestionController::is_suppressed_by_peer(100.0, true, 50.0, false));
    }

    #[test]
    fn confirmed_rtt_not_suppressed_when_own_rate_lower() {
        assert!(!CongestionController::is_suppressed_by_peer(10.0, true, 50.0, false));
    }

    #[test]
    fn unconfirmed_rtt_suppressed_if_peer_confirmed() {
        assert!(CongestionController::is_suppressed_by_peer(100.0, false, 10.0, true));
    }

    #[test]
    fn cc_holdoff_none_for_unicast() {
        let cc = CongestionController::new();
        assert!(cc.cc_holdoff_interval(0.1, 4.0, true).is_none());
    }

    #[test]
    fn cc_holdoff_present_for_multicast_non_clr() {
        let cc = CongestionController::new();
        assert_eq!(cc.cc_holdoff_interval(0.1, 4.0, false), Some(0.4));
    }
}
