//! # Loss Estimator (C1)
//!
//! TFRC-style loss-event history feeding the congestion-control rate
//! equation (spec.md §3 `LossEstimator`, §4.7 rate equation's `p`).
//! Grounded on the teacher's `congestion.rs` history-vector/EWMA idiom
//! (`RadioMetrics`'s windowed samples), with the loss-event weighting
//! scheme itself following the classic TFRC 8-interval weighted average.

use std::collections::VecDeque;

/// Number of historical loss intervals retained (spec.md §3: "array of 8-9
/// recent intervals").
const HISTORY_LEN: usize = 8;

/// TFRC-style loss-event weights, heaviest on the most recent interval.
const WEIGHTS: [f64; HISTORY_LEN] = [1.0, 1.0, 1.0, 1.0, 0.8, 0.6, 0.4, 0.2];

/// Tracks loss events as a sliding window of inter-event intervals (in
/// received-packet counts) and derives a TFRC loss-event rate from them.
#[derive(Debug, Clone)]
pub struct LossEstimator {
    /// Interval lengths, most recent first.
    history: VecDeque<f64>,
    /// Packets received since the start of the current (still open) interval.
    current_count: f64,
    /// Sequence number at which the current loss event began, to dedupe
    /// bursty loss within a single "event window".
    event_anchor: Option<u32>,
    /// Minimum gap (in received packets) before a further loss counts as a
    /// new event rather than part of the same burst.
    event_window: u32,
    total_received: u32,
}

impl LossEstimator {
    pub fn new(event_window: u32) -> Self {
        LossEstimator {
            history: VecDeque::with_capacity(HISTORY_LEN),
            current_count: 0.0,
            event_anchor: None,
            event_window: event_window.max(1),
            total_received: 0,
        }
    }

    /// Record one received (non-lost) packet.
    pub fn on_received(&mut self) {
        self.current_count += 1.0;
        self.total_received += 1;
    }

    /// Record a detected loss event at sequence `seq`. Within
    /// `event_window` packets of a prior event, this is folded into the
    /// same burst rather than starting a new history entry.
    pub fn on_loss_event(&mut self, seq: u32) {
        let is_new_event = match self.event_anchor {
            None => true,
            Some(anchor) => seq.wrapping_sub(anchor) >= self.event_window,
        };
        if !is_new_event {
            return;
        }
        self.event_anchor = Some(seq);
        self.history.push_front(self.current_count.max(1.0));
        self.history.truncate(HISTORY_LEN);
        self.current_count = 0.0;
    }

    /// Weighted average loss interval per TFRC, including the still-open
    /// current interval as an unweighted sample when it would otherwise
    /// inflate the estimate (standard "discount the open interval unless
    /// it's larger than the history average" treatment).
    pub fn average_loss_interval(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let weighted: f64 = self
            .history
            .iter()
            .zip(WEIGHTS.iter())
            .map(|(i, w)| i * w)
            .sum();
        let weight_sum: f64 = WEIGHTS.iter().take(self.history.len()).sum();
        let history_avg = weighted / weight_sum;

        if self.current_count > history_avg {
            Some(history_avg)
        } else {
            let mut combined = vec![self.current_count];
            combined.extend(self.history.iter().copied());
            let weighted: f64 = combined
                .iter()
                .zip(WEIGHTS.iter())
                .map(|(i, w)| i * w)
                .sum();
            let weight_sum: f64 = WEIGHTS.iter().take(combined.len()).sum();
            Some(weighted / weight_sum)
        }
    }

    /// Loss event rate `p` for the TFRC rate equation (§4.7), `0.0` when no
    /// loss event has yet been observed.
    pub fn loss_event_rate(&self) -> f64 {
        match self.average_loss_interval() {
            Some(avg) if avg > 0.0 => (1.0 / avg).min(1.0),
            _ => 0.0,
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn total_received(&self) -> u32 {
        self.total_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loss_event_yields_zero_rate() {
        let est = LossEstimator::new(10);
        assert_eq!(est.loss_event_rate(), 0.0);
    }

    #[test]
    fn single_loss_event_populates_history() {
        let mut est = LossEstimator::new(10);
        for _ in 0..20 {
            est.on_received();
        }
        est.on_loss_event(20);
        assert_eq!(est.history_len(), 1);
        assert!(est.loss_event_rate() > 0.0);
    }

    #[test]
    fn bursty_loss_within_window_is_one_event() {
        let mut est = LossEstimator::new(10);
        for _ in 0..20 {
            est.on_received();
        }
        est.on_loss_event(20);
        est.on_loss_event(22);
        assert_eq!(est.history_len(), 1);
    }

    #[test]
    fn loss_far_apart_creates_separate_events() {
        let mut est = LossEstimator::new(10);
        for _ in 0..20 {
            est.on_received();
        }
        est.on_loss_event(20);
        for _ in 0..20 {
            est.on_received();
        }
        est.on_loss_event(50);
        assert_eq!(est.history_len(), 2);
    }

    #[test]
    fn higher_loss_frequency_increases_rate() {
        let mut frequent = LossEstimator::new(1);
        let mut rare = LossEstimator::new(1);
        for seq in 0..100 {
            frequent.on_received();
            if seq % 5 == 0 {
                frequent.on_loss_event(seq);
            }
            rare.on_received();
            if seq % 50 == 0 {
                rare.on_loss_event(seq);
            }
        }
        assert!(frequent.loss_event_rate() > rare.loss_event_rate());
    }
}
