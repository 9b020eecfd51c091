//! # Sync Engine (C5)
//!
//! Synchronization is the anchor of receiver reliability (spec.md §4.4):
//! initial sync, subsequent (SQUELCH-driven) resync, object-status
//! classification, and `SetPending`. Grounded on the teacher's
//! `session.rs` state-machine-on-struct idiom (`SessionState`/`Session`
//! methods mutating a small set of fields in place).

use crate::bitmap::PendingBitmap;
use crate::message::SeqId16;
use crate::object::SyncPolicy;

/// The subset of an incoming message `sync_test`/`SetPending` need.
#[derive(Debug, Clone, Copy)]
pub struct SyncCandidate {
    pub object_id: SeqId16,
    pub is_stream: bool,
    pub is_info: bool,
    pub is_repair: bool,
    /// `Some(block_id)` for DATA messages; `None` for INFO.
    pub data_block_id: Option<u32>,
}

/// Per-sender sync state (a field subset of `SenderState`, spec.md §3).
#[derive(Debug, Clone)]
pub struct SyncState {
    pub synchronized: bool,
    pub sync_id: SeqId16,
    pub next_id: SeqId16,
    pub max_pending_object: SeqId16,
    pub current_object_id: SeqId16,
    pub sync_policy: SyncPolicy,
    pub resync_count: u32,
    max_pending_range: u16,
}

/// What the sync engine decided about an incoming message during initial
/// sync test (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTestResult {
    Accept,
    Reject,
}

/// Status classification for `GetObjectStatus` (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    Invalid,
    Complete,
    Pending,
    New,
}

/// What a subsequent-sync call requires the caller to purge from `rx_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncAction {
    None,
    AbortAll,
    AbortBelow(SeqId16),
}

impl SyncState {
    pub fn new(sync_policy: SyncPolicy, max_pending_range: u16) -> Self {
        SyncState {
            synchronized: false,
            sync_id: SeqId16::ZERO,
            next_id: SeqId16::ZERO,
            max_pending_object: SeqId16::ZERO,
            current_object_id: SeqId16::ZERO,
            sync_policy,
            resync_count: 0,
            max_pending_range,
        }
    }

    /// `sync_test` (spec.md §4.4 initial sync).
    pub fn sync_test(&self, candidate: &SyncCandidate) -> SyncTestResult {
        if candidate.is_repair {
            return SyncTestResult::Reject;
        }
        match self.sync_policy {
            SyncPolicy::All => SyncTestResult::Accept,
            SyncPolicy::Current | SyncPolicy::Stream => {
                if candidate.is_stream || candidate.is_info || candidate.data_block_id == Some(0) {
                    SyncTestResult::Accept
                } else {
                    SyncTestResult::Reject
                }
            }
        }
    }

    /// Run initial sync against `candidate`. Returns `true` if the receiver
    /// became synchronized (candidate accepted and marked pending by the
    /// caller via `set_pending`).
    pub fn initial_sync(&mut self, candidate: &SyncCandidate) -> bool {
        if self.synchronized {
            return false;
        }
        if self.sync_test(candidate) != SyncTestResult::Accept {
            return false;
        }
        self.synchronized = true;
        match self.sync_policy {
            SyncPolicy::Current | SyncPolicy::Stream => {
                self.sync_id = candidate.object_id;
                self.next_id = candidate.object_id;
                self.max_pending_object = candidate.object_id;
            }
            SyncPolicy::All => {
                self.sync_id = candidate.object_id.wrapping_sub(self.max_pending_range - 1);
                self.next_id = self.sync_id;
                self.max_pending_object = candidate.object_id;
            }
        }
        self.current_object_id = candidate.object_id;
        true
    }

    /// Subsequent sync (SQUELCH / `UpdateSyncStatus` on INVALID) to target
    /// id `t` (spec.md §4.4). Re-anchors the pending bitmap's sliding
    /// window to the new `sync_id` so it keeps tracking ids in
    /// `[sync_id, next_id)` instead of drifting out of range.
    pub fn subsequent_sync(&mut self, t: SeqId16, bitmap: &mut PendingBitmap) -> ResyncAction {
        let action = if t.delta(self.max_pending_object) > 0
            || self.next_id.delta(t) > self.max_pending_range as i32
        {
            self.resync_count += 1;
            ResyncAction::AbortAll
        } else if t.delta(self.sync_id) > 0 {
            self.resync_count += 1;
            ResyncAction::AbortBelow(t)
        } else {
            ResyncAction::None
        };

        if t.delta(self.next_id) >= 0 {
            self.next_id = t.wrapping_add(1);
        }
        if t.delta(self.max_pending_object) > 0 {
            self.max_pending_object = t;
        }
        self.sync_id = t;
        bitmap.rebase(self.sync_id);
        action
    }

    /// `GetObjectStatus` (spec.md §4.4).
    pub fn object_status(&self, id: SeqId16, bitmap: &PendingBitmap) -> ObjectStatus {
        if id.delta(self.sync_id) < 0 {
            if self.sync_id.delta(id) > 2 * self.max_pending_range as i32 {
                ObjectStatus::Invalid
            } else {
                ObjectStatus::Complete
            }
        } else if id.delta(self.next_id) < 0 {
            if bitmap.test(id) {
                ObjectStatus::Pending
            } else {
                ObjectStatus::Complete
            }
        } else if bitmap.can_set(id) {
            ObjectStatus::New
        } else {
            ObjectStatus::Invalid
        }
    }

    /// `SetPending(id)` (spec.md §4.4). Re-anchors the bitmap to the
    /// current `sync_id` before marking bits, so the window keeps sliding
    /// forward instead of staying pinned at its initial base.
    pub fn set_pending(&mut self, id: SeqId16, bitmap: &mut PendingBitmap) {
        bitmap.rebase(self.sync_id);
        if id.delta(self.next_id) < 0 {
            bitmap.set(id);
        } else {
            let n = (id.delta(self.next_id) + 1) as usize;
            bitmap.set_bits(self.next_id, n);
            self.next_id = id.wrapping_add(1);
        }
        if let Some(first) = bitmap.first_set() {
            self.sync_id = first;
        }
    }
}
