//! # Session Collaborator
//!
//! The session/multiplexer seam (spec.md §6 "Session collaborator
//! (consumed)"). The core never owns a socket or an address family; it asks
//! this trait for everything session-scoped and hands it outbound messages
//! to queue. Grounded on the teacher's own collaborator-trait pattern for
//! externalized send paths (`sender.rs`'s `output_queue` handoff).

use crate::message::{OutboundAck, OutboundNack};

/// Event kinds delivered via `SessionServices::notify` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    GrttUpdated,
    RxObjectNew,
    RxObjectCompleted,
    RxObjectAborted,
    RxCmdNew,
    RemoteSenderActive,
    RemoteSenderInactive,
}

/// Everything the per-sender engine needs from its owning session.
///
/// Implemented by the host application/session multiplexer; the core code
/// in this crate only ever sees `&dyn SessionServices` (or a generic `S:
/// SessionServices`), never a concrete session type.
pub trait SessionServices {
    fn local_node_id(&self) -> u32;
    fn is_multicast(&self) -> bool;
    fn remote_sender_buffer_size(&self) -> usize;
    fn rx_cache_max(&self) -> u16;
    fn tx_robust_factor(&self) -> u8;
    fn rx_robust_factor(&self) -> u8;

    fn default_repair_boundary(&self) -> crate::object::RepairBoundary;
    fn default_sync_policy(&self) -> crate::object::SyncPolicy;
    fn default_nacking_mode(&self) -> crate::object::NackingMode;
    fn unicast_nacks(&self) -> bool;
    fn ecn_ignore_loss(&self) -> bool;
    fn cc_tolerate_loss(&self) -> bool;
    fn receiver_is_silent(&self) -> bool;
    fn rcvr_is_realtime(&self) -> bool;
    fn rcvr_ignore_info(&self) -> bool;

    /// Queue an outbound NACK. Returns `false` if the message pool was
    /// exhausted and the caller should log and drop (spec.md §5 "Shared
    /// resources").
    fn send_nack(&mut self, nack: OutboundNack) -> bool;
    /// Queue an outbound ACK (CC or FLUSH variant).
    fn send_ack(&mut self, ack: OutboundAck) -> bool;

    /// Arm a named timer for this sender (activity/repair/cc/ack); the
    /// session owns the actual scheduler primitive (spec.md §1 Out of
    /// scope: "the timer scheduler primitive").
    fn activate_timer(&mut self, sender_id: u32, timer: TimerKind, interval: std::time::Duration);

    fn notify(&mut self, event: NotifyEvent, sender_id: u32, object_id: Option<crate::message::SeqId16>);
}

/// Which per-sender timer an `activate_timer` call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Activity,
    Repair,
    Cc,
    Ack,
}
