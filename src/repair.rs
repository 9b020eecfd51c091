//! # Repair / NACK Engine (C6)
//!
//! The protocol's hardest subsystem: request enough to repair gaps while
//! suppressing against other receivers so the sender isn't flooded
//! (spec.md §4.5). Grounded on the teacher's `arq.rs`
//! (`LossDetector`/NACK-range coalescing idiom) for the backoff/suppression
//! shape, with the exact interval formulas taken from `original_source`'s
//! repair-timer handling in `normNode.cpp`.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::bitmap::PendingBitmap;
use crate::congestion::cc_feedback;
use crate::message::{OutboundNack, RepairItem, RepairLevel, SeqId16};
use crate::object::{CheckLevel, NackingMode, Object, RepairableObject};
use crate::rand_util::exponential_rand;
use crate::sync::SyncState;
use crate::timer::{Timer, TimerPhase};

/// Per-sender repair/NACK state.
#[derive(Debug)]
pub struct RepairEngine {
    pub timer: Timer,
    /// Overheard object-level repair suppression (spec.md §4.5
    /// `rx_repair_mask`).
    pub repair_mask: PendingBitmap,
    pub suppress_count: u32,
    pub nack_count: u32,
}

impl RepairEngine {
    pub fn new(mask_range: usize) -> Self {
        RepairEngine {
            timer: Timer::new(),
            repair_mask: PendingBitmap::new(mask_range),
            suppress_count: 0,
            nack_count: 0,
        }
    }
}

/// `RepairCheck(check_level, obj_id, block_id, seg_id)` (spec.md §4.5).
#[allow(clippy::too_many_arguments)]
pub fn repair_check(
    engine: &mut RepairEngine,
    rx_table: &mut BTreeMap<SeqId16, Object>,
    sync: &mut SyncState,
    check_level: CheckLevel,
    obj_id: SeqId16,
    block_id: u32,
    seg_id: u16,
    grtt: f64,
    backoff_factor: f64,
    group_size: f64,
    unicast: bool,
) {
    if obj_id.delta(sync.max_pending_object) > 0 {
        sync.max_pending_object = obj_id;
    }

    match engine.timer.phase() {
        TimerPhase::Inactive => {
            let mut has_work = false;
            for (&id, obj) in rx_table.range_mut(..=obj_id) {
                let level = if id == obj_id {
                    check_level
                } else {
                    CheckLevel::ThruObject
                };
                if obj.receiver_repair_check(level, block_id, seg_id, false) {
                    has_work = true;
                }
            }
            if has_work {
                let interval = if unicast {
                    0.0
                } else {
                    exponential_rand(grtt * backoff_factor, group_size)
                };
                engine.timer.activate_backoff(Duration::from_secs_f64(interval));
                engine.repair_mask.clear_all();
            }
        }
        TimerPhase::Backoff => {
            if let Some(obj) = rx_table.get_mut(&obj_id) {
                obj.receiver_repair_check(check_level, block_id, seg_id, true);
            }
            if obj_id.precedes(sync.current_object_id) {
                sync.current_object_id = obj_id;
            }
        }
        TimerPhase::Holdoff => {
            let rewound = obj_id.precedes(sync.current_object_id)
                || rx_table
                    .get_mut(&obj_id)
                    .is_some_and(|o| o.receiver_rewind_check(block_id, seg_id));
            if rewound {
                engine.timer.deactivate();
                repair_check(
                    engine,
                    rx_table,
                    sync,
                    check_level,
                    obj_id,
                    block_id,
                    seg_id,
                    grtt,
                    backoff_factor,
                    group_size,
                    unicast,
                );
            }
        }
    }
}

/// Holdoff interval after a NACK is sent (spec.md §4.5).
pub fn holdoff_interval(
    unicast: bool,
    grtt: f64,
    backoff_factor: f64,
    nominal_packet_size: f64,
    recv_rate: f64,
) -> f64 {
    if unicast {
        if recv_rate > 0.0 {
            grtt + (nominal_packet_size / recv_rate).min(grtt)
        } else {
            2.0 * grtt
        }
    } else {
        grtt * (backoff_factor + 2.0)
    }
}

/// Inputs needed to attach a CC-feedback extension to an outbound NACK.
#[derive(Debug, Clone, Copy)]
pub struct CcFeedbackInputs {
    pub rtt_quantized: u8,
    pub loss: f64,
    pub recv_rate: f64,
    pub cc_sequence: u16,
}

/// Backoff-timer expiry: build a NACK, or suppress and enter holdoff
/// (spec.md §4.5 "Backoff expiry — build NACK").
#[allow(clippy::too_many_arguments)]
pub fn build_nack(
    engine: &mut RepairEngine,
    rx_table: &mut BTreeMap<SeqId16, Object>,
    sync: &SyncState,
    bitmap: &PendingBitmap,
    cc: Option<CcFeedbackInputs>,
    sender_id: u32,
    instance_id: u16,
    unicast_nacks: bool,
    nacking_mode: NackingMode,
    grtt: f64,
    backoff_factor: f64,
    nominal_packet_size: f64,
    recv_rate: f64,
) -> Option<OutboundNack> {
    let mut pending_ids = Vec::new();
    let mut cursor = sync.sync_id;
    while cursor.delta(sync.current_object_id) <= 0 {
        if bitmap.test(cursor) && !engine.repair_mask.test(cursor) {
            pending_ids.push(cursor);
        }
        if cursor == sync.current_object_id {
            break;
        }
        cursor = cursor.wrapping_add(1);
    }

    let any_pending = pending_ids.iter().any(|&id| {
        let is_final = id == sync.max_pending_object;
        rx_table
            .get(&id)
            .map(|o| o.is_repair_pending(is_final))
            .unwrap_or(true)
    });

    if !any_pending {
        engine.suppress_count += 1;
        engine.timer.activate_holdoff(Duration::from_secs_f64(holdoff_interval(
            unicast_nacks,
            grtt,
            backoff_factor,
            nominal_packet_size,
            recv_rate,
        )));
        return None;
    }

    let cc_result = cc.map(|inputs| {
        cc_feedback(inputs.rtt_quantized, inputs.loss, inputs.recv_rate, inputs.cc_sequence)
    });

    let mut requests = Vec::new();
    let mut i = 0;
    while i < pending_ids.len() {
        let id = pending_ids[i];
        if rx_table.contains_key(&id) {
            let is_tail = id == sync.max_pending_object;
            let obj = rx_table.get_mut(&id).unwrap();
            obj.append_repair_request(&mut requests, !is_tail);
            i += 1;
        } else {
            let mut j = i;
            while j < pending_ids.len() && !rx_table.contains_key(&pending_ids[j]) {
                j += 1;
            }
            let run_len = j - i;
            let level = if nacking_mode == NackingMode::InfoOnly {
                RepairLevel::Info
            } else {
                RepairLevel::Object
            };
            if run_len >= 3 {
                requests.push(RepairItem {
                    level,
                    first_object: pending_ids[i],
                    last_object: pending_ids[j - 1],
                    block_id: None,
                    segment_id: None,
                });
            } else {
                for item in pending_ids.iter().take(j).skip(i) {
                    requests.push(RepairItem {
                        level,
                        first_object: *item,
                        last_object: *item,
                        block_id: None,
                        segment_id: None,
                    });
                }
            }
            i = j;
        }
    }

    if requests.is_empty() {
        engine.suppress_count += 1;
        engine.timer.activate_holdoff(Duration::from_secs_f64(holdoff_interval(
            unicast_nacks,
            grtt,
            backoff_factor,
            nominal_packet_size,
            recv_rate,
        )));
        return None;
    }

    engine.nack_count += 1;
    Some(OutboundNack {
        sender_id,
        instance_id,
        unicast: unicast_nacks,
        cc_feedback: cc_result,
        requests,
    })
}

/// `HandleRepairContent`: overheard repair requests from a peer NACK or a
/// sender REPAIR_ADV (spec.md §4.5).
pub fn handle_repair_content(
    engine: &mut RepairEngine,
    rx_table: &mut BTreeMap<SeqId16, Object>,
    requests: &[RepairItem],
) {
    for req in requests {
        match req.level {
            RepairLevel::Object => {
                let n = (req.last_object.delta(req.first_object) + 1).max(1) as usize;
                engine.repair_mask.set_bits(req.first_object, n);
            }
            RepairLevel::Info => {
                if let Some(obj) = rx_table.get_mut(&req.first_object) {
                    obj.set_repair_info();
                }
            }
            RepairLevel::Block => {
                if let Some(obj) = rx_table.get_mut(&req.first_object) {
                    if let Some(block_id) = req.block_id {
                        obj.set_repairs(block_id, block_id);
                    }
                }
            }
            RepairLevel::Segment => {
                if let Some(obj) = rx_table.get_mut(&req.first_object) {
                    if let Some(block_id) = req.block_id {
                        match req.segment_id {
                            Some(seg_id) => obj.set_segment_repair(block_id, seg_id),
                            None => obj.set_repairs(block_id, block_id),
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;

    fn fresh_sync() -> SyncState {
        let mut s = SyncState::new(crate::object::SyncPolicy::Current, 64);
        s.sync_id = SeqId16(0);
        s.next_id = SeqId16(3);
        s.max_pending_object = SeqId16(2);
        s.current_object_id = SeqId16(2);
        s
    }

    // ─── RepairCheck idle phase ───

    #[test]
    fn idle_phase_arms_backoff_when_work_found() {
        let mut engine = RepairEngine::new(64);
        let mut table = BTreeMap::new();
        let mut obj = Object::new(SeqId16(2), ObjectType::Data, 4, 2, 0);
        obj.block_mut_or_insert(0);
        table.insert(SeqId16(2), obj);
        let mut sync = fresh_sync();

        repair_check(
            &mut engine,
            &mut table,
            &mut sync,
            CheckLevel::ThruBlock,
            SeqId16(2),
            0,
            0,
            0.1,
            4.0,
            10.0,
            true,
        );
        assert!(engine.timer.is_active());
    }

    #[test]
    fn idle_phase_does_not_arm_when_nothing_missing() {
        let mut engine = RepairEngine::new(64);
        let mut table = BTreeMap::new();
        let mut obj = Object::new(SeqId16(2), ObjectType::Data, 4, 2, 0);
        {
            let b = obj.block_mut_or_insert(0);
            b.complete = true;
        }
        table.insert(SeqId16(2), obj);
        let mut sync = fresh_sync();

        repair_check(
            &mut engine,
            &mut table,
            &mut sync,
            CheckLevel::ThruBlock,
            SeqId16(2),
            0,
            0,
            0.1,
            4.0,
            10.0,
            true,
        );
        assert!(!engine.timer.is_active());
    }

    // ─── Build NACK ───

    #[test]
    fn build_nack_suppressed_when_nothing_pending_in_bitmap() {
        let mut engine = RepairEngine::new(64);
        let mut table = BTreeMap::new();
        let sync = fresh_sync();
        let bitmap = PendingBitmap::new(64);
        let nack = build_nack(
            &mut engine,
            &mut table,
            &sync,
            &bitmap,
            None,
            1,
            0,
            false,
            NackingMode::Normal,
            0.1,
            4.0,
            1000.0,
            5000.0,
        );
        assert!(nack.is_none());
        assert_eq!(engine.suppress_count, 1);
        assert_eq!(engine.timer.phase(), TimerPhase::Holdoff);
    }

    #[test]
    fn build_nack_emits_object_range_for_missing_run() {
        let mut engine = RepairEngine::new(64);
        let mut table = BTreeMap::new();
        let mut sync = fresh_sync();
        sync.sync_id = SeqId16(0);
        sync.current_object_id = SeqId16(3);
        sync.max_pending_object = SeqId16(3);
        let mut bitmap = PendingBitmap::new(64);
        bitmap.set_bits(SeqId16(0), 4);

        let nack = build_nack(
            &mut engine,
            &mut table,
            &sync,
            &bitmap,
            None,
            1,
            0,
            false,
            NackingMode::Normal,
            0.1,
            4.0,
            1000.0,
            5000.0,
        );
        let nack = nack.unwrap();
        assert_eq!(nack.requests.len(), 1);
        assert_eq!(nack.requests[0].level, RepairLevel::Object);
        assert_eq!(nack.requests[0].first_object, SeqId16(0));
        assert_eq!(nack.requests[0].last_object, SeqId16(3));
        assert_eq!(engine.nack_count, 1);
    }

    #[test]
    fn build_nack_attaches_cc_feedback_with_start_flag_on_zero_loss() {
        let mut engine = RepairEngine::new(64);
        let mut table = BTreeMap::new();
        let mut sync = fresh_sync();
        sync.current_object_id = SeqId16(2);
        let mut bitmap = PendingBitmap::new(64);
        bitmap.set(SeqId16(2));

        let nack = build_nack(
            &mut engine,
            &mut table,
            &sync,
            &bitmap,
            Some(CcFeedbackInputs {
                rtt_quantized: 100,
                loss: 0.0,
                recv_rate: 1000.0,
                cc_sequence: 7,
            }),
            1,
            0,
            false,
            NackingMode::Normal,
            0.1,
            4.0,
            1000.0,
            5000.0,
        )
        .unwrap();
        let cc = nack.cc_feedback.unwrap();
        assert!(cc.start);
    }

    // ─── Overheard suppression ───

    #[test]
    fn handle_repair_content_object_level_sets_mask() {
        let mut engine = RepairEngine::new(64);
        let mut table = BTreeMap::new();
        let requests = vec![RepairItem {
            level: RepairLevel::Object,
            first_object: SeqId16(1),
            last_object: SeqId16(3),
            block_id: None,
            segment_id: None,
        }];
        handle_repair_content(&mut engine, &mut table, &requests);
        assert!(engine.repair_mask.test(SeqId16(1)));
        assert!(engine.repair_mask.test(SeqId16(3)));
    }

    #[test]
    fn handle_repair_content_info_level_sets_object_flag() {
        let mut engine = RepairEngine::new(64);
        let mut table = BTreeMap::new();
        table.insert(SeqId16(1), Object::new(SeqId16(1), ObjectType::Data, 4, 2, 0));
        let requests = vec![RepairItem {
            level: RepairLevel::Info,
            first_object: SeqId16(1),
            last_object: SeqId16(1),
            block_id: None,
            segment_id: None,
        }];
        handle_repair_content(&mut engine, &mut table, &requests);
        assert!(table[&SeqId16(1)].repair_info_flag);
    }

    // ─── Holdoff interval ───

    #[test]
    fn holdoff_interval_multicast_formula() {
        let interval = holdoff_interval(false, 0.1, 4.0, 1000.0, 5000.0);
        assert!((interval - 0.1 * 6.0).abs() < 1e-9);
    }

    #[test]
    fn holdoff_interval_unicast_with_recv_rate() {
        let interval = holdoff_interval(true, 0.1, 4.0, 1000.0, 10000.0);
        assert!((interval - (0.1 + (1000.0_f64 / 10000.0).min(0.1))).abs() < 1e-9);
    }

    #[test]
    fn holdoff_interval_unicast_without_recv_rate() {
        let interval = holdoff_interval(true, 0.1, 4.0, 1000.0, 0.0);
        assert!((interval - 0.2).abs() < 1e-9);
    }
}
