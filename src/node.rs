//! # Sender-Node Controller (C10)
//!
//! Routes incoming messages by kind and owns every other per-sender
//! component (spec.md §4.10). Grounded on the teacher's `receiver.rs` top-
//! level state-machine struct with a `drain_events`-shaped API, though here
//! events are pushed straight through the `SessionServices::notify`
//! collaborator rather than buffered for polling.

use std::collections::BTreeMap;

use quanta::Instant;
use tracing::{debug, info, warn};

use crate::activity::{ActivityOutcome, ActivityTimer, WatermarkAck};
use crate::bitmap::PendingBitmap;
use crate::collab::{NotifyEvent, SessionServices, TimerKind};
use crate::config::{activity_interval, PoolConfig};
use crate::congestion::{cc_feedback, CcProbeResponse, CongestionController};
use crate::error::NormError;
use crate::fec::select_decoder;
use crate::loss::LossEstimator;
use crate::message::{
    unquantize_rate, unquantize_rtt, Command, FecPayloadId, InboundMessage, ObjectKind,
    ObjectMessage, OutboundAck, SeqId16,
};
use crate::object::{CheckLevel, NackingMode, Object, ObjectType, RepairBoundary, RepairableObject};
use crate::pool::{compute_pool_sizing, get_free_segment, BlockPool, RetrievalPool, SegmentPool};
use crate::repair::{build_nack, handle_repair_content, repair_check, CcFeedbackInputs, RepairEngine};
use crate::sync::{ObjectStatus, ResyncAction, SyncCandidate, SyncState};

/// Per-sender receiver state: the aggregate spec.md §3 `SenderState`.
pub struct SenderState {
    pub sender_id: u32,
    pub instance_id: Option<u16>,

    pub sync: SyncState,
    pub bitmap: PendingBitmap,
    pub rx_table: BTreeMap<SeqId16, Object>,
    pub repair: RepairEngine,
    pub cc: CongestionController,
    pub activity: ActivityTimer,
    pub watermark: WatermarkAck,
    /// `(object_id, block_id, segment_id)` the armed watermark ack_timer is
    /// waiting to ack; `None` when the timer is inactive.
    pub watermark_target: Option<(SeqId16, u32, u16)>,
    pub commands: crate::command::CommandQueue,
    pub loss: LossEstimator,

    pub block_pool: Option<BlockPool>,
    pub segment_pool: Option<SegmentPool>,
    pub retrieval_pool: Option<RetrievalPool>,

    pub fec_id: u8,
    pub fec_m: u8,
    pub segment_size: u16,
    pub num_data: u16,
    pub num_parity: u16,

    pub grtt_estimate: f64,
    pub grtt_quantized: u8,
    pub grtt_send_time: Option<Instant>,
    pub grtt_recv_time: Option<Instant>,
    pub group_size: f64,
    pub backoff_factor: f64,
    pub rtt_estimate: f64,
    pub rtt_quantized: u8,
    pub rtt_confirmed: bool,

    pub repair_boundary: RepairBoundary,
    pub nacking_mode: NackingMode,
    pub unicast_nacks: bool,
    pub tx_robust_factor: u8,

    pub completion_count: u32,
    pub failure_count: u32,
}

impl SenderState {
    pub fn new(sender_id: u32, session: &impl SessionServices) -> Self {
        let max_pending_range = session.rx_cache_max();
        let mask_range = (2 * max_pending_range as usize).max(16);
        SenderState {
            sender_id,
            instance_id: None,
            sync: SyncState::new(session.default_sync_policy(), max_pending_range),
            bitmap: PendingBitmap::new(mask_range),
            rx_table: BTreeMap::new(),
            repair: RepairEngine::new(mask_range),
            cc: CongestionController::new(),
            activity: ActivityTimer::new(session.rx_robust_factor()),
            watermark: WatermarkAck::new(),
            watermark_target: None,
            commands: crate::command::CommandQueue::new(16, 0),
            loss: LossEstimator::new(8),
            block_pool: None,
            segment_pool: None,
            retrieval_pool: None,
            fec_id: 0,
            fec_m: 0,
            segment_size: 0,
            num_data: 0,
            num_parity: 0,
            grtt_estimate: 0.5,
            grtt_quantized: 0,
            grtt_send_time: None,
            grtt_recv_time: None,
            group_size: 2.0,
            backoff_factor: 4.0,
            rtt_estimate: 0.1,
            rtt_quantized: 0,
            rtt_confirmed: false,
            repair_boundary: session.default_repair_boundary(),
            nacking_mode: session.default_nacking_mode(),
            unicast_nacks: session.unicast_nacks(),
            tx_robust_factor: session.tx_robust_factor(),
            completion_count: 0,
            failure_count: 0,
        }
    }

    /// Allocate buffer pools on first DATA message, once FTI is known
    /// (spec.md §3 "Lifecycles"; §4.2 sizing).
    pub fn open(
        &mut self,
        fec_id: u8,
        fec_m: u8,
        segment_size: u16,
        num_data: u16,
        num_parity: u16,
        pool_cfg: &PoolConfig,
    ) -> Result<(), NormError> {
        let sizing = compute_pool_sizing(num_data, num_parity, segment_size, pool_cfg);
        let slot_len = segment_size as usize + pool_cfg.stream_header_bytes;
        self.block_pool = Some(BlockPool::new(sizing.num_blocks, (num_data + num_parity) as usize));
        self.segment_pool = Some(SegmentPool::new(sizing.num_segments.max(num_data as usize * 2), slot_len));
        self.retrieval_pool = Some(RetrievalPool::new(num_data as usize, slot_len));
        self.fec_id = fec_id;
        self.fec_m = fec_m;
        self.segment_size = segment_size;
        self.num_data = num_data;
        self.num_parity = num_parity;
        Ok(())
    }

    fn activity_interval(&self) -> std::time::Duration {
        activity_interval(self.activity_robust_factor(), self.grtt_estimate)
    }

    fn activity_robust_factor(&self) -> u8 {
        self.tx_robust_factor
    }

    /// Sender `instance_id` change forces a full resync (§3, SPEC_FULL §C).
    fn check_instance_id(&mut self, incoming: u16, services: &mut impl SessionServices) {
        match self.instance_id {
            None => self.instance_id = Some(incoming),
            Some(current) if current != incoming => {
                info!(sender_id = self.sender_id, "sender instance-id changed, forcing resync");
                self.instance_id = Some(incoming);
                self.sync.synchronized = false;
                self.rx_table.clear();
                self.bitmap.clear_all();
                self.sync.resync_count += 1;
                services.notify(NotifyEvent::RxObjectAborted, self.sender_id, None);
            }
            Some(_) => {}
        }
    }

    fn update_grtt_and_group(&mut self, header: &crate::message::MessageHeader, services: &mut impl SessionServices) {
        let new_grtt = unquantize_rtt(header.grtt_quantized);
        if header.grtt_quantized != self.grtt_quantized {
            self.grtt_quantized = header.grtt_quantized;
            self.grtt_estimate = new_grtt;
            services.notify(NotifyEvent::GrttUpdated, self.sender_id, None);
            if self.activity.timer.is_active() {
                self.activity.timer.set_interval(self.activity_interval());
            }
        }
        // Group size and backoff factor are small quantized fields; the
        // wire collaborator hands us them pre-decoded already.
        self.group_size = (header.group_size_quantized as f64 + 1.0).max(2.0);
        self.backoff_factor = (header.backoff_factor as f64 / 16.0).max(1.0);
    }

    fn ensure_object(&mut self, object_id: SeqId16, kind: ObjectType) -> &mut Object {
        let (num_data, num_parity, segs_per_block) = (self.num_data, self.num_parity, 0);
        self.rx_table
            .entry(object_id)
            .or_insert_with(|| Object::new(object_id, kind, num_data, num_parity, segs_per_block))
    }

    /// Apply a `ResyncAction` (spec.md §4.4 "abort all / abort below").
    fn apply_resync(&mut self, action: ResyncAction, services: &mut impl SessionServices) {
        match action {
            ResyncAction::None => {}
            ResyncAction::AbortAll => {
                for (&id, _) in self.rx_table.iter() {
                    services.notify(NotifyEvent::RxObjectAborted, self.sender_id, Some(id));
                }
                self.rx_table.clear();
                self.bitmap.clear_all();
            }
            ResyncAction::AbortBelow(t) => {
                let to_remove: Vec<SeqId16> = self
                    .rx_table
                    .keys()
                    .filter(|id| id.delta(t) < 0)
                    .copied()
                    .collect();
                for id in to_remove {
                    self.rx_table.remove(&id);
                    services.notify(NotifyEvent::RxObjectAborted, self.sender_id, Some(id));
                }
                // `subsequent_sync` already rebased the bitmap to `t`, which
                // drops anything below it as part of the shift.
            }
        }
    }

    /// Route one OBJECT (INFO/DATA) message (spec.md §4.10, §4.4, §4.5).
    pub fn handle_object(&mut self, msg: &ObjectMessage, services: &mut impl SessionServices) {
        self.check_instance_id(msg.header.instance_id, services);
        self.update_grtt_and_group(&msg.header, services);
        self.cc.on_message_received(
            Instant::now(),
            msg.payload_len as usize,
            self.grtt_estimate,
            Some(self.rtt_estimate),
            self.rtt_confirmed,
        );
        self.loss.on_received();
        self.activity.on_message_received(self.activity_interval());

        if let Some(fti) = msg.fti {
            if self.block_pool.is_none() {
                match select_decoder(fti.fec_id, fti.fec_m, msg.header.instance_id, crate::config::FecVariant::ReedSolomon) {
                    Ok(_) => {
                        let cfg = PoolConfig::default();
                        if let Err(e) = self.open(fti.fec_id, fti.fec_m, fti.segment_size, fti.num_data, fti.num_parity, &cfg) {
                            warn!(sender_id = self.sender_id, error = %e, "buffer pool allocation failed");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(sender_id = self.sender_id, error = %e, "unsupported FEC parameters");
                        return;
                    }
                }
            }
        } else if self.block_pool.is_none() && !msg.is_info {
            warn!(sender_id = self.sender_id, "missing FTI on first DATA message");
            return;
        }

        if !self.sync.synchronized {
            let candidate = SyncCandidate {
                object_id: msg.object_id,
                is_stream: msg.is_stream,
                is_info: msg.is_info,
                is_repair: msg.is_repair,
                data_block_id: if msg.is_info { None } else { Some(msg.payload_id.block_id) },
            };
            if !self.sync.initial_sync(&candidate) {
                debug!(sender_id = self.sender_id, "initial sync rejected message");
                return;
            }
            self.sync.set_pending(msg.object_id, &mut self.bitmap);
            services.notify(NotifyEvent::RxObjectNew, self.sender_id, Some(msg.object_id));
        } else {
            match self.sync.object_status(msg.object_id, &self.bitmap) {
                ObjectStatus::Invalid => {
                    let action = self.sync.subsequent_sync(msg.object_id, &mut self.bitmap);
                    self.apply_resync(action, services);
                    self.sync.set_pending(msg.object_id, &mut self.bitmap);
                }
                ObjectStatus::New => {
                    self.sync.set_pending(msg.object_id, &mut self.bitmap);
                    services.notify(NotifyEvent::RxObjectNew, self.sender_id, Some(msg.object_id));
                }
                ObjectStatus::Pending | ObjectStatus::Complete => {}
            }
        }

        if !msg.is_info {
            self.ensure_object(msg.object_id, msg.kind_to_object_type());
            let block_id = msg.payload_id.block_id;
            let seg_id = msg.payload_id.segment_id as usize;

            if let (Some(block_pool), Some(segment_pool)) =
                (self.block_pool.as_mut(), self.segment_pool.as_mut())
            {
                let needs_segment = self
                    .rx_table
                    .get_mut(&msg.object_id)
                    .map(|obj| {
                        let block = obj.block_mut_or_insert(block_id);
                        seg_id < block.slots.len() && block.slots[seg_id].is_none()
                    })
                    .unwrap_or(false);

                if needs_segment {
                    match get_free_segment(
                        block_pool,
                        segment_pool,
                        &mut self.rx_table,
                        msg.object_id,
                        services.receiver_is_silent(),
                        services.rcvr_is_realtime(),
                    ) {
                        Some(handle) => {
                            let obj = self.rx_table.get_mut(&msg.object_id).unwrap();
                            let block = obj.block_mut_or_insert(block_id);
                            block.slots[seg_id] = Some(handle);
                            block.pending.set(seg_id);
                        }
                        None => {
                            warn!(sender_id = self.sender_id, "segment pool exhausted, dropping symbol");
                        }
                    }
                }

                if let Some(obj) = self.rx_table.get_mut(&msg.object_id) {
                    let block = obj.block_mut_or_insert(block_id);
                    if !block.complete && block.symbol_count() >= self.num_data as usize {
                        block.complete = true;
                        let all_complete = obj.blocks.values().all(|b| b.complete);
                        if all_complete {
                            self.completion_count += 1;
                            services.notify(NotifyEvent::RxObjectCompleted, self.sender_id, Some(msg.object_id));
                        }
                    }
                }
            }
        }

        repair_check(
            &mut self.repair,
            &mut self.rx_table,
            &mut self.sync,
            CheckLevel::ThruSegment,
            msg.object_id,
            msg.payload_id.block_id,
            msg.payload_id.segment_id,
            self.grtt_estimate,
            self.backoff_factor,
            self.group_size,
            self.unicast_nacks,
        );

        if self.repair.timer.phase() == crate::timer::TimerPhase::Backoff
            && self.repair.timer.interval() == std::time::Duration::ZERO
        {
            self.fire_repair_backoff(services);
        } else if self.repair.timer.is_active() {
            services.activate_timer(self.sender_id, TimerKind::Repair, self.repair.timer.interval());
        }
    }

    /// Backoff-timer expiry: build and send a NACK (spec.md §4.5).
    pub fn fire_repair_backoff(&mut self, services: &mut impl SessionServices) {
        let cc = self.cc.cc_enable.then_some(CcFeedbackInputs {
            rtt_quantized: self.rtt_quantized,
            loss: self.loss.loss_event_rate(),
            recv_rate: self.cc.recv_rate,
            cc_sequence: self.cc.cc_sequence,
        });
        let nack = build_nack(
            &mut self.repair,
            &mut self.rx_table,
            &self.sync,
            &self.bitmap,
            cc,
            self.sender_id,
            self.instance_id.unwrap_or(0),
            self.unicast_nacks,
            self.nacking_mode,
            self.grtt_estimate,
            self.backoff_factor,
            self.cc.nominal_packet_size,
            self.cc.recv_rate,
        );
        if let Some(nack) = nack {
            if !services.send_nack(nack) {
                warn!(sender_id = self.sender_id, "message pool exhausted, dropping NACK");
            }
        }
        if self.repair.timer.is_active() {
            services.activate_timer(self.sender_id, TimerKind::Repair, self.repair.timer.interval());
        }
    }

    /// Send the deferred ACK(CC) and enter holdoff, or deactivate the CC
    /// timer for CLR/PLR/unicast receivers (spec.md §4.7 `OnCCTimeout`).
    fn fire_cc_ack(&mut self, services: &mut impl SessionServices) {
        let feedback = cc_feedback(
            self.rtt_quantized,
            self.loss.loss_event_rate(),
            self.cc.recv_rate,
            self.cc.cc_sequence,
        );
        let ack = OutboundAck::Cc {
            sender_id: self.sender_id,
            instance_id: self.instance_id.unwrap_or(0),
            cc_feedback: feedback,
        };
        if !services.send_ack(ack) {
            warn!(sender_id = self.sender_id, "message pool exhausted, dropping ACK(CC)");
        }
        match self.cc.cc_holdoff_interval(self.grtt_estimate, self.backoff_factor, self.unicast_nacks) {
            Some(secs) => {
                let interval = std::time::Duration::from_secs_f64(secs);
                self.cc.cc_timer.activate_holdoff(interval);
                services.activate_timer(self.sender_id, TimerKind::Cc, interval);
            }
            None => self.cc.cc_timer.deactivate(),
        }
    }

    /// CC-timer backoff expiry (spec.md §4.7).
    pub fn on_cc_timeout(&mut self, services: &mut impl SessionServices) {
        if self.cc.cc_timer.phase() == crate::timer::TimerPhase::Backoff {
            self.fire_cc_ack(services);
        }
    }

    /// Send the deferred ACK(FLUSH) (spec.md §4.8).
    fn fire_watermark_ack(&mut self, services: &mut impl SessionServices) {
        let Some((object_id, block_id, seg_id)) = self.watermark_target.take() else {
            return;
        };
        let cc_feedback = self.cc.cc_enable.then(|| {
            cc_feedback(self.rtt_quantized, self.loss.loss_event_rate(), self.cc.recv_rate, self.cc.cc_sequence)
        });
        let ack = self.watermark.build_flush_ack(
            self.sender_id,
            self.instance_id.unwrap_or(0),
            FecPayloadId {
                object_id,
                block_id,
                segment_id: seg_id,
                is_final: false,
            },
            cc_feedback,
        );
        if !services.send_ack(ack) {
            warn!(sender_id = self.sender_id, "message pool exhausted, dropping ACK(FLUSH)");
        }
    }

    /// Ack-timer expiry (spec.md §4.8).
    pub fn on_ack_timeout(&mut self, services: &mut impl SessionServices) {
        if self.watermark.ack_timer.phase() == crate::timer::TimerPhase::Backoff {
            self.fire_watermark_ack(services);
        }
    }

    /// Route a CMD message (spec.md §4.10).
    pub fn handle_command(&mut self, header: &crate::message::MessageHeader, cmd: &Command, services: &mut impl SessionServices) {
        self.check_instance_id(header.instance_id, services);
        self.update_grtt_and_group(header, services);
        self.activity.on_message_received(self.activity_interval());

        match cmd {
            Command::Squelch { sync_object_id, .. } => {
                let action = self.sync.subsequent_sync(*sync_object_id, &mut self.bitmap);
                self.apply_resync(action, services);
            }
            Command::RepairAdv { requests } => {
                handle_repair_content(&mut self.repair, &mut self.rx_table, requests);
            }
            Command::Application { content } => {
                if !self.commands.enqueue(content) {
                    warn!(sender_id = self.sender_id, "command queue full or content oversized, dropping");
                } else {
                    services.notify(NotifyEvent::RxCmdNew, self.sender_id, None);
                }
            }
            Command::Cc {
                cc_sequence,
                send_rate_quantized,
                node_list,
            } => {
                self.cc.cc_sequence = *cc_sequence;
                if let Some(entry) = node_list.iter().find(|n| n.node_id == services.local_node_id()) {
                    self.cc.cc_enable = true;
                    self.cc.send_rate = unquantize_rate(*send_rate_quantized);
                    if let Some(rtt_q) = entry.rtt_quantized {
                        if rtt_q != self.rtt_quantized {
                            self.rtt_quantized = rtt_q;
                            self.rtt_estimate = unquantize_rtt(rtt_q);
                        }
                        self.rtt_confirmed = true;
                    }
                    self.cc.is_clr = entry.is_clr;
                    self.cc.is_plr = !entry.is_clr && entry.is_plr;

                    match self.cc.cc_probe_response(self.unicast_nacks) {
                        CcProbeResponse::RespondNow => self.fire_cc_ack(services),
                        CcProbeResponse::Backoff => {
                            let max_backoff = self.grtt_estimate * self.backoff_factor;
                            let local_rate = CongestionController::calculate_rate(
                                self.segment_size as f64,
                                self.rtt_estimate,
                                self.loss.loss_event_rate(),
                            );
                            let secs = self.cc.cc_backoff_interval(local_rate, max_backoff, self.group_size);
                            let interval = std::time::Duration::from_secs_f64(secs);
                            self.cc.cc_timer.activate_backoff(interval);
                            services.activate_timer(self.sender_id, TimerKind::Cc, interval);
                        }
                    }
                }
            }
            Command::Flush {
                object_id,
                block_id,
                segment_id,
                acking_nodes,
            } => {
                let self_listed = acking_nodes.contains(&services.local_node_id());
                if self_listed {
                    let armed = match self.rx_table.get_mut(object_id) {
                        Some(obj) => self.watermark.handle_flush(
                            true,
                            obj,
                            *block_id,
                            *segment_id,
                            self.grtt_estimate,
                            self.unicast_nacks,
                        ),
                        None => false,
                    };
                    if armed {
                        self.watermark_target = Some((*object_id, *block_id, *segment_id));
                        let interval = self.watermark.ack_timer.interval();
                        if interval == std::time::Duration::ZERO {
                            self.fire_watermark_ack(services);
                        } else {
                            services.activate_timer(self.sender_id, TimerKind::Ack, interval);
                        }
                    } else {
                        repair_check(
                            &mut self.repair,
                            &mut self.rx_table,
                            &mut self.sync,
                            CheckLevel::ThruSegment,
                            *object_id,
                            *block_id,
                            *segment_id,
                            self.grtt_estimate,
                            self.backoff_factor,
                            self.group_size,
                            self.unicast_nacks,
                        );
                    }
                }
            }
            Command::AckRequest { .. } => {
                // Ambient GRTT/group/activity estimates are already updated
                // above; an explicit ACK_REQ otherwise shares no state with
                // the CC/FLUSH watermark machinery.
            }
        }
    }

    /// Overheard NACK/ACK: repair and CC suppression (spec.md §4.10, §4.5, §4.7).
    pub fn handle_overheard(&mut self, msg: &InboundMessage) {
        match msg {
            InboundMessage::Nack { requests, .. } => {
                handle_repair_content(&mut self.repair, &mut self.rx_table, requests);
            }
            InboundMessage::Ack {
                cc_sequence: Some(_),
                rate_quantized: Some(rate_q),
                rtt_confirmed,
                ..
            } => {
                let peer_rate = crate::message::unquantize_rate(*rate_q);
                if CongestionController::is_suppressed_by_peer(
                    self.cc.recv_rate,
                    self.rtt_confirmed,
                    peer_rate,
                    *rtt_confirmed,
                ) && self.repair.timer.is_active()
                {
                    self.repair
                        .timer
                        .activate_holdoff(std::time::Duration::from_secs_f64(self.grtt_estimate * self.backoff_factor));
                }
            }
            _ => {}
        }
    }

    /// Activity-timer expiry (spec.md §4.8).
    pub fn on_activity_timeout(&mut self, services: &mut impl SessionServices) {
        match self.activity.on_expiry(self.activity_interval()) {
            ActivityOutcome::ForceRepairCheck => {
                if self.sync.synchronized {
                    // TODO: only checks block 0 of max_pending_object, not every
                    // pending object in the window.
                    repair_check(
                        &mut self.repair,
                        &mut self.rx_table,
                        &mut self.sync,
                        CheckLevel::ThruObject,
                        self.sync.max_pending_object,
                        0,
                        0,
                        self.grtt_estimate,
                        self.backoff_factor,
                        self.group_size,
                        self.unicast_nacks,
                    );
                }
            }
            ActivityOutcome::SenderInactive => {
                services.notify(NotifyEvent::RemoteSenderInactive, self.sender_id, None);
            }
        }
    }
}

/// `ObjectMessage::kind` is the wire-level `ObjectKind`; the data model's
/// `rx_table` keys off the internal `ObjectType` instead.
impl ObjectMessage {
    fn kind_to_object_type(&self) -> ObjectType {
        match self.kind {
            ObjectKind::File => ObjectType::File,
            ObjectKind::Data => ObjectType::Data,
            ObjectKind::Stream => ObjectType::Stream,
        }
    }
}
