//! # Activity Timer & Watermark ACK (C8)
//!
//! Sender-inactivity detection and FLUSH-driven positive ACK (spec.md
//! §4.8). Grounded on the teacher's `session.rs` `RttTracker`
//! timeout-on-elapsed idiom — a small struct wrapping a `Timer` plus a
//! remaining-attempts counter, reset on every received message.

use std::time::Duration;

use crate::message::FecPayloadId;
use crate::object::RepairableObject;
use crate::rand_util::uniform_rand;
use crate::timer::Timer;

/// Outcome of an activity-timer expiry (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// Intermediate expiry: force a comprehensive repair check.
    ForceRepairCheck,
    /// Final expiry: sender is no longer active.
    SenderInactive,
}

/// Per-sender activity-timeout tracking.
#[derive(Debug)]
pub struct ActivityTimer {
    pub timer: Timer,
    repeat_remaining: u8,
    robust_factor: u8,
    pub sender_active: bool,
}

impl ActivityTimer {
    pub fn new(robust_factor: u8) -> Self {
        ActivityTimer {
            timer: Timer::new(),
            repeat_remaining: robust_factor,
            robust_factor,
            sender_active: true,
        }
    }

    /// Reset on every message from the sender (spec.md §4.8).
    pub fn on_message_received(&mut self, interval: Duration) {
        self.repeat_remaining = self.robust_factor;
        self.sender_active = true;
        self.timer.activate_backoff(interval);
        self.timer.set_repeat(self.robust_factor as i32);
    }

    /// Timer expiry with no intervening message.
    pub fn on_expiry(&mut self, interval: Duration) -> ActivityOutcome {
        if self.repeat_remaining == 0 {
            self.sender_active = false;
            self.timer.deactivate();
            ActivityOutcome::SenderInactive
        } else {
            self.repeat_remaining -= 1;
            self.timer.activate_backoff(interval);
            ActivityOutcome::ForceRepairCheck
        }
    }
}

/// Watermark-ACK state for CMD(FLUSH) handling (spec.md §4.8).
#[derive(Debug)]
pub struct WatermarkAck {
    pub ack_timer: Timer,
}

impl WatermarkAck {
    pub fn new() -> Self {
        WatermarkAck {
            ack_timer: Timer::new(),
        }
    }

    /// Handle an incoming CMD(FLUSH): if this node is in the acking list
    /// and nothing is outstanding up to the watermark, arm the ack timer.
    pub fn handle_flush<O: RepairableObject>(
        &mut self,
        self_listed: bool,
        object: &mut O,
        block_id: u32,
        seg_id: u16,
        grtt: f64,
        unicast: bool,
    ) -> bool {
        if !self_listed {
            return false;
        }
        if object.passive_repair_check(block_id, seg_id) {
            return false;
        }
        let interval = if unicast { 0.0 } else { uniform_rand(grtt) };
        self.ack_timer
            .activate_backoff(Duration::from_secs_f64(interval));
        true
    }

    /// Build the outbound ACK(FLUSH) on ack-timer expiry.
    pub fn build_flush_ack(
        &mut self,
        sender_id: u32,
        instance_id: u16,
        payload_id: FecPayloadId,
        cc_feedback: Option<crate::message::CcFeedback>,
    ) -> crate::message::OutboundAck {
        self.ack_timer.deactivate();
        crate::message::OutboundAck::Flush {
            sender_id,
            instance_id,
            payload_id,
            cc_feedback,
        }
    }
}

impl Default for WatermarkAck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SeqId16;
    use crate::object::{CheckLevel, ObjectType};

    struct FakeObject {
        pending: bool,
    }

    impl RepairableObject for FakeObject {
        fn id(&self) -> SeqId16 {
            SeqId16(0)
        }
        fn kind(&self) -> ObjectType {
            ObjectType::Data
        }
        fn is_stream(&self) -> bool {
            false
        }
        fn set_repair_info(&mut self) {}
        fn set_repairs(&mut self, _: u32, _: u32) {}
        fn set_segment_repair(&mut self, _: u32, _: u16) {}
        fn find_block(&self, _: u32) -> Option<&crate::object::Block> {
            None
        }
        fn receiver_repair_check(&mut self, _: CheckLevel, _: u32, _: u16, _: bool) -> bool {
            false
        }
        fn receiver_rewind_check(&mut self, _: u32, _: u16) -> bool {
            false
        }
        fn passive_repair_check(&mut self, _: u32, _: u16) -> bool {
            self.pending
        }
        fn append_repair_request(&mut self, _: &mut Vec<crate::message::RepairItem>, _: bool) -> bool {
            false
        }
        fn is_repair_pending(&self, _: bool) -> bool {
            self.pending
        }
        fn pending_mask_is_set(&self) -> bool {
            self.pending
        }
        fn reclaim_source_segments(&mut self) -> Vec<crate::object::SegmentHandle> {
            Vec::new()
        }
        fn steal_oldest_block(&mut self) -> Option<crate::object::Block> {
            None
        }
        fn steal_newest_block(&mut self) -> Option<crate::object::Block> {
            None
        }
    }

    // ─── Activity timer ───

    #[test]
    fn message_received_resets_repeat_and_marks_active() {
        let mut at = ActivityTimer::new(3);
        at.on_expiry(Duration::from_secs(1));
        at.on_expiry(Duration::from_secs(1));
        at.on_message_received(Duration::from_secs(1));
        assert!(at.sender_active);
        assert_eq!(at.on_expiry(Duration::from_secs(1)), ActivityOutcome::ForceRepairCheck);
    }

    #[test]
    fn repeated_expiry_eventually_marks_inactive() {
        let mut at = ActivityTimer::new(2);
        assert_eq!(at.on_expiry(Duration::from_secs(1)), ActivityOutcome::ForceRepairCheck);
        assert_eq!(at.on_expiry(Duration::from_secs(1)), ActivityOutcome::ForceRepairCheck);
        assert_eq!(at.on_expiry(Duration::from_secs(1)), ActivityOutcome::SenderInactive);
        assert!(!at.sender_active);
    }

    // ─── Watermark ACK ───

    #[test]
    fn flush_not_listed_does_not_arm() {
        let mut wm = WatermarkAck::new();
        let mut obj = FakeObject { pending: true };
        assert!(!wm.handle_flush(false, &mut obj, 0, 0, 0.1, false));
        assert!(!wm.ack_timer.is_active());
    }

    #[test]
    fn flush_listed_but_pending_does_not_arm() {
        let mut wm = WatermarkAck::new();
        let mut obj = FakeObject { pending: true };
        assert!(!wm.handle_flush(true, &mut obj, 0, 0, 0.1, false));
    }

    #[test]
    fn flush_listed_and_nothing_pending_arms_timer() {
        let mut wm = WatermarkAck::new();
        let mut obj = FakeObject { pending: false };
        assert!(wm.handle_flush(true, &mut obj, 0, 0, 0.1, false));
        assert!(wm.ack_timer.is_active());
    }

    #[test]
    fn flush_unicast_zero_interval() {
        let mut wm = WatermarkAck::new();
        let mut obj = FakeObject { pending: false };
        wm.handle_flush(true, &mut obj, 0, 0, 0.1, true);
        assert_eq!(wm.ack_timer.interval(), Duration::ZERO);
    }
}
