//! End-to-end scenarios driving `SenderState` through a fake session
//! collaborator, covering the canonical receiver-lifecycle walks.

use std::time::Duration;

use norm_rx_engine::collab::{NotifyEvent, SessionServices, TimerKind};
use norm_rx_engine::message::{
    CcNodeEntry, Command, FecPayloadId, FecTransmissionInfo, MessageHeader, ObjectKind,
    ObjectMessage, OutboundAck, OutboundNack, SeqId16,
};
use norm_rx_engine::node::SenderState;
use norm_rx_engine::object::{NackingMode, RepairBoundary, SyncPolicy};

struct FakeSession {
    nacks: Vec<OutboundNack>,
    acks: Vec<OutboundAck>,
    notifications: Vec<(NotifyEvent, u32, Option<SeqId16>)>,
    unicast: bool,
}

impl FakeSession {
    fn new() -> Self {
        FakeSession {
            nacks: Vec::new(),
            acks: Vec::new(),
            notifications: Vec::new(),
            unicast: false,
        }
    }
}

impl SessionServices for FakeSession {
    fn local_node_id(&self) -> u32 {
        7
    }
    fn is_multicast(&self) -> bool {
        !self.unicast
    }
    fn remote_sender_buffer_size(&self) -> usize {
        2_000_000
    }
    fn rx_cache_max(&self) -> u16 {
        256
    }
    fn tx_robust_factor(&self) -> u8 {
        20
    }
    fn rx_robust_factor(&self) -> u8 {
        20
    }
    fn default_repair_boundary(&self) -> RepairBoundary {
        RepairBoundary::Block
    }
    fn default_sync_policy(&self) -> SyncPolicy {
        SyncPolicy::Current
    }
    fn default_nacking_mode(&self) -> NackingMode {
        NackingMode::Normal
    }
    fn unicast_nacks(&self) -> bool {
        self.unicast
    }
    fn ecn_ignore_loss(&self) -> bool {
        false
    }
    fn cc_tolerate_loss(&self) -> bool {
        false
    }
    fn receiver_is_silent(&self) -> bool {
        false
    }
    fn rcvr_is_realtime(&self) -> bool {
        false
    }
    fn rcvr_ignore_info(&self) -> bool {
        false
    }
    fn send_nack(&mut self, nack: OutboundNack) -> bool {
        self.nacks.push(nack);
        true
    }
    fn send_ack(&mut self, ack: OutboundAck) -> bool {
        self.acks.push(ack);
        true
    }
    fn activate_timer(&mut self, _sender_id: u32, _timer: TimerKind, _interval: Duration) {}
    fn notify(&mut self, event: NotifyEvent, sender_id: u32, object_id: Option<SeqId16>) {
        self.notifications.push((event, sender_id, object_id));
    }
}

fn header() -> MessageHeader {
    MessageHeader {
        grtt_quantized: 120,
        group_size_quantized: 2,
        backoff_factor: 64,
        sender_id: 99,
        instance_id: 0,
    }
}

fn data_msg(object_id: u16, block_id: u32, seg_id: u16, with_fti: bool) -> ObjectMessage {
    ObjectMessage {
        header: header(),
        object_id: SeqId16(object_id),
        kind: ObjectKind::Data,
        is_info: false,
        is_repair: false,
        is_stream: false,
        fti: with_fti.then_some(FecTransmissionInfo {
            fec_id: 2,
            fec_m: 8,
            segment_size: 1024,
            num_data: 8,
            num_parity: 4,
        }),
        payload_id: FecPayloadId {
            object_id: SeqId16(object_id),
            block_id,
            segment_id: seg_id,
            is_final: false,
        },
        payload_len: 1024,
    }
}

/// R1: first DATA+FTI of a fresh sender drives initial sync and pool allocation.
#[test]
fn fresh_sender_syncs_on_first_data_message() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    state.handle_object(&data_msg(0, 0, 0, true), &mut session);

    assert!(state.sync.synchronized);
    assert!(state.block_pool.is_some());
    assert!(session
        .notifications
        .iter()
        .any(|(e, _, _)| *e == NotifyEvent::RxObjectNew));
}

/// R2: a full block's worth of symbols marks the block (and single-block
/// object) complete and notifies once.
#[test]
fn receiving_all_symbols_completes_the_object() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);

    for seg in 0..8u16 {
        state.handle_object(&data_msg(0, 0, seg, seg == 0), &mut session);
    }

    assert_eq!(state.completion_count, 1);
    let completions = session
        .notifications
        .iter()
        .filter(|(e, _, _)| *e == NotifyEvent::RxObjectCompleted)
        .count();
    assert_eq!(completions, 1);
}

/// A SQUELCH command advances sync and purges anything now invalid.
#[test]
fn squelch_advances_sync_id() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    state.handle_object(&data_msg(0, 0, 0, true), &mut session);

    let cmd = Command::Squelch {
        sync_object_id: SeqId16(10),
        invalid_ids: vec![SeqId16(0)],
    };
    state.handle_command(&header(), &cmd, &mut session);
    assert_eq!(state.sync.sync_id, SeqId16(10));
}

/// An unsynchronized sender with a missing-FTI DATA message stays unsynchronized.
#[test]
fn missing_fti_leaves_sender_unsynchronized() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    state.handle_object(&data_msg(0, 0, 0, false), &mut session);
    assert!(!state.sync.synchronized);
}

/// A sender instance-id change forces a full resync, dropping prior state.
#[test]
fn instance_id_rollover_forces_resync() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    state.handle_object(&data_msg(0, 0, 0, true), &mut session);
    assert!(!state.rx_table.is_empty());

    let mut msg = data_msg(1, 0, 0, true);
    msg.header.instance_id = 5;
    state.handle_object(&msg, &mut session);
    assert_eq!(state.instance_id, Some(5));
}

/// Repeated activity-timer expiry with no traffic eventually marks the
/// sender inactive.
#[test]
fn silence_eventually_marks_sender_inactive() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    state.handle_object(&data_msg(0, 0, 0, true), &mut session);

    for _ in 0..21 {
        state.on_activity_timeout(&mut session);
    }
    assert!(session
        .notifications
        .iter()
        .any(|(e, _, _)| *e == NotifyEvent::RemoteSenderInactive));
}

/// CMD(CC) naming this node drives an immediate unicast ACK(CC) and
/// enables CC feedback on subsequent NACKs.
#[test]
fn cc_command_for_self_enables_cc_and_acks_unicast() {
    let mut session = FakeSession::new();
    session.unicast = true;
    let mut state = SenderState::new(99, &session);
    state.handle_object(&data_msg(0, 0, 0, true), &mut session);

    let cmd = Command::Cc {
        cc_sequence: 3,
        send_rate_quantized: 40,
        node_list: vec![CcNodeEntry {
            node_id: 7,
            is_clr: true,
            is_plr: false,
            rtt_quantized: Some(90),
        }],
    };
    state.handle_command(&header(), &cmd, &mut session);

    assert!(state.cc.cc_enable);
    assert!(state.cc.is_clr);
    assert_eq!(state.cc.cc_sequence, 3);
    assert!(session
        .acks
        .iter()
        .any(|a| matches!(a, OutboundAck::Cc { .. })));
}

/// CMD(CC) that doesn't name this node leaves CC disabled.
#[test]
fn cc_command_without_self_does_not_enable_cc() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    state.handle_object(&data_msg(0, 0, 0, true), &mut session);

    let cmd = Command::Cc {
        cc_sequence: 1,
        send_rate_quantized: 40,
        node_list: vec![CcNodeEntry {
            node_id: 123,
            is_clr: false,
            is_plr: false,
            rtt_quantized: None,
        }],
    };
    state.handle_command(&header(), &cmd, &mut session);

    assert!(!state.cc.cc_enable);
    assert!(session.acks.is_empty());
}

/// CMD(FLUSH) listing this node, with the object fully received, fires a
/// unicast ACK(FLUSH) immediately instead of arming the ack timer.
#[test]
fn flush_command_for_completed_object_acks_unicast() {
    let mut session = FakeSession::new();
    session.unicast = true;
    let mut state = SenderState::new(99, &session);
    for seg in 0..8u16 {
        state.handle_object(&data_msg(0, 0, seg, seg == 0), &mut session);
    }

    let cmd = Command::Flush {
        object_id: SeqId16(0),
        block_id: 0,
        segment_id: 7,
        acking_nodes: vec![7],
    };
    state.handle_command(&header(), &cmd, &mut session);

    assert!(state.watermark_target.is_none());
    assert!(session
        .acks
        .iter()
        .any(|a| matches!(a, OutboundAck::Flush { .. })));
}

/// CMD(FLUSH) that doesn't list this node produces no ACK.
#[test]
fn flush_command_without_self_listed_is_ignored() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    for seg in 0..8u16 {
        state.handle_object(&data_msg(0, 0, seg, seg == 0), &mut session);
    }

    let cmd = Command::Flush {
        object_id: SeqId16(0),
        block_id: 0,
        segment_id: 7,
        acking_nodes: vec![123],
    };
    state.handle_command(&header(), &cmd, &mut session);

    assert!(session.acks.is_empty());
}

/// An application CMD is queued and dequeuable through `CommandQueue`.
#[test]
fn application_command_round_trips_through_queue() {
    let mut session = FakeSession::new();
    let mut state = SenderState::new(99, &session);
    let cmd = Command::Application {
        content: b"status-report".to_vec(),
    };
    state.handle_command(&header(), &cmd, &mut session);

    match state.commands.read_next(Some(64)) {
        norm_rx_engine::command::CmdReadResult::Dequeued(bytes) => {
            assert_eq!(bytes, b"status-report");
        }
        other => panic!("expected a dequeued command, got {other:?}"),
    }
}
