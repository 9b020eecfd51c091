//! # Object / Block / Segment Data Model
//!
//! Spec.md §3 data model plus the `RepairableObject` collaborator trait from
//! §6 ("Object collaborator (used by NACK engine)"). Grounded on the
//! teacher's `pool.rs` `PacketContext`/`PacketEntry` shape: a small owned
//! struct plus a pool-issued opaque handle rather than a shared pointer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::{RepairItem, RepairLevel, SeqId16};

/// Opaque handle into the segment pool (`pool.rs`). `Block` stores these
/// rather than owning byte buffers directly — the buffers live in the pool
/// and are loaned out, matching the teacher's `PacketHandle(usize)` idiom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentHandle(pub usize);

/// Kind of object carried by the transmission (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Data,
    Stream,
}

/// Sliding-window sync policy (spec.md §4.4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
    Current,
    Stream,
    All,
}

/// Repair granularity default (spec.md §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairBoundary {
    Block,
    Object,
}

/// Default NACKing mode (spec.md §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NackingMode {
    None,
    InfoOnly,
    Normal,
}

/// Repair-check depth, ordered shallow-to-deep exactly as spec.md §4.5
/// enumerates it: a check at a deeper level subsumes all shallower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckLevel {
    ThruInfo,
    ToBlock,
    ThruBlock,
    ThruSegment,
    ThruObject,
}

/// A simple fixed-width bitset for per-block segment pending/repair masks.
/// Distinct from `bitmap::PendingBitmap` (the C4 sliding object-id window):
/// this one has a small, block-local, non-sliding extent.
#[derive(Debug, Clone)]
pub struct SegmentMask {
    bits: Vec<bool>,
}

impl SegmentMask {
    pub fn new(len: usize) -> Self {
        SegmentMask {
            bits: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn set(&mut self, idx: usize) {
        if idx < self.bits.len() {
            self.bits[idx] = true;
        }
    }

    pub fn unset(&mut self, idx: usize) {
        if idx < self.bits.len() {
            self.bits[idx] = false;
        }
    }

    pub fn test(&self, idx: usize) -> bool {
        self.bits.get(idx).copied().unwrap_or(false)
    }

    pub fn set_range(&mut self, first: usize, last: usize) {
        let last = last.min(self.bits.len().saturating_sub(1));
        for i in first..=last.max(first) {
            self.set(i);
        }
    }

    pub fn any_set(&self) -> bool {
        self.bits.iter().any(|b| *b)
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }
}

/// A single FEC source block within an `Object` (spec.md §3).
#[derive(Debug, Clone)]
pub struct Block {
    pub block_id: u32,
    /// Segment pool handles for this block's `num_data + num_parity` slots;
    /// `None` where no symbol has arrived yet.
    pub slots: Vec<Option<SegmentHandle>>,
    /// Which slots hold data awaiting delivery/decode.
    pub pending: SegmentMask,
    /// Which slots are outstanding repair requests (overheard suppression).
    pub repair: SegmentMask,
    pub complete: bool,
}

impl Block {
    pub fn new(block_id: u32, num_slots: usize) -> Self {
        Block {
            block_id,
            slots: vec![None; num_slots],
            pending: SegmentMask::new(num_slots),
            repair: SegmentMask::new(num_slots),
            complete: false,
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Empty this block's segment slots back into the provided free list,
    /// matching §4.2 "a stolen block empties its segments back into the
    /// segment pool."
    pub fn drain_segments(&mut self) -> Vec<SegmentHandle> {
        let drained: Vec<SegmentHandle> = self.slots.iter_mut().filter_map(|s| s.take()).collect();
        self.pending.clear();
        self.repair.clear();
        drained
    }
}

/// Per-in-flight-object receiver state (spec.md §3).
#[derive(Debug, Clone)]
pub struct Object {
    pub object_id: SeqId16,
    pub kind: ObjectType,
    pub size: Option<u64>,
    pub info_present: bool,
    pub num_data: u16,
    pub num_parity: u16,
    pub segs_per_block: usize,
    pub blocks: BTreeMap<u32, Block>,
    /// Block ids known (from FTI / block-zero size) to exist but not yet
    /// fully received; used by `is_repair_pending`.
    pub pending_block_ids: std::collections::BTreeSet<u32>,
    pub repair_info_flag: bool,
    /// Block-level overheard-repair suppression range (inclusive).
    pub repair_block_range: Option<(u32, u32)>,
    pub current_block_id: u32,
}

impl Object {
    pub fn new(
        object_id: SeqId16,
        kind: ObjectType,
        num_data: u16,
        num_parity: u16,
        segs_per_block: usize,
    ) -> Self {
        Object {
            object_id,
            kind,
            size: None,
            info_present: false,
            num_data,
            num_parity,
            segs_per_block,
            blocks: BTreeMap::new(),
            pending_block_ids: std::collections::BTreeSet::new(),
            repair_info_flag: false,
            repair_block_range: None,
            current_block_id: 0,
        }
    }

    fn slots_for_block(&self) -> usize {
        self.num_data as usize + self.num_parity as usize
    }

    pub fn block_mut_or_insert(&mut self, block_id: u32) -> &mut Block {
        let slots = self.slots_for_block();
        self.blocks
            .entry(block_id)
            .or_insert_with(|| Block::new(block_id, slots))
    }
}

/// The NACK engine's view of an in-flight object (spec.md §6 "Object
/// collaborator"). `Object` implements this directly; the trait exists so
/// `repair.rs` can be exercised against a test double.
pub trait RepairableObject {
    fn id(&self) -> SeqId16;
    fn kind(&self) -> ObjectType;
    fn is_stream(&self) -> bool;
    fn set_repair_info(&mut self);
    fn set_repairs(&mut self, block_first: u32, block_last: u32);
    fn set_segment_repair(&mut self, block_id: u32, seg_id: u16);
    fn find_block(&self, id: u32) -> Option<&Block>;
    fn receiver_repair_check(
        &mut self,
        level: CheckLevel,
        block_id: u32,
        seg_id: u16,
        backoff_active: bool,
    ) -> bool;
    fn receiver_rewind_check(&mut self, block_id: u32, seg_id: u16) -> bool;
    fn passive_repair_check(&mut self, block_id: u32, seg_id: u16) -> bool;
    fn append_repair_request(&mut self, requests: &mut Vec<RepairItem>, flush: bool) -> bool;
    fn is_repair_pending(&self, is_final: bool) -> bool;
    fn pending_mask_is_set(&self) -> bool;
    fn reclaim_source_segments(&mut self) -> Vec<SegmentHandle>;
    fn steal_oldest_block(&mut self) -> Option<Block>;
    fn steal_newest_block(&mut self) -> Option<Block>;
}

impl RepairableObject for Object {
    fn id(&self) -> SeqId16 {
        self.object_id
    }

    fn kind(&self) -> ObjectType {
        self.kind
    }

    fn is_stream(&self) -> bool {
        matches!(self.kind, ObjectType::Stream)
    }

    fn set_repair_info(&mut self) {
        self.repair_info_flag = true;
    }

    fn set_repairs(&mut self, block_first: u32, block_last: u32) {
        self.repair_block_range = Some((block_first, block_last));
        for (id, block) in self.blocks.range_mut(block_first..=block_last) {
            let _ = id;
            block.repair.set_range(0, block.slots.len().saturating_sub(1));
        }
    }

    /// Mark a single segment within `block_id` as an outstanding repair
    /// (§4.5 SEGMENT-level overheard suppression), rather than the whole
    /// block's range.
    fn set_segment_repair(&mut self, block_id: u32, seg_id: u16) {
        if let Some(block) = self.blocks.get_mut(&block_id) {
            block.repair.set(seg_id as usize);
        }
    }

    fn find_block(&self, id: u32) -> Option<&Block> {
        self.blocks.get(&id)
    }

    fn receiver_repair_check(
        &mut self,
        level: CheckLevel,
        block_id: u32,
        seg_id: u16,
        backoff_active: bool,
    ) -> bool {
        if backoff_active {
            // Trim scope: drop repair-suppression for anything before this
            // block now that we've confirmed what's still outstanding.
            self.repair_block_range = None;
        }
        match level {
            CheckLevel::ThruInfo => !self.info_present,
            CheckLevel::ToBlock | CheckLevel::ThruBlock => self
                .blocks
                .range(..=block_id)
                .any(|(_, b)| !b.complete && b.symbol_count() < self.num_data as usize),
            CheckLevel::ThruSegment => self.blocks.get(&block_id).is_some_and(|b| {
                !b.complete && (0..seg_id as usize).any(|i| b.slots.get(i).is_none_or(|s| s.is_none()))
            }),
            CheckLevel::ThruObject => self
                .blocks
                .values()
                .any(|b| !b.complete && b.symbol_count() < self.num_data as usize),
        }
    }

    fn receiver_rewind_check(&mut self, block_id: u32, _seg_id: u16) -> bool {
        block_id < self.current_block_id
    }

    fn passive_repair_check(&mut self, block_id: u32, seg_id: u16) -> bool {
        self.blocks.get(&block_id).is_some_and(|b| {
            !b.complete
                && (0..=seg_id as usize)
                    .take(b.slots.len())
                    .any(|i| b.slots[i].is_none())
        })
    }

    fn append_repair_request(&mut self, requests: &mut Vec<RepairItem>, flush: bool) -> bool {
        let missing: Vec<u32> = self
            .blocks
            .iter()
            .filter(|(_, b)| !b.complete && b.symbol_count() < self.num_data as usize)
            .map(|(id, _)| *id)
            .collect();
        if missing.is_empty() && !self.repair_info_flag {
            return false;
        }
        if self.repair_info_flag {
            requests.push(RepairItem {
                level: RepairLevel::Info,
                first_object: self.object_id,
                last_object: self.object_id,
                block_id: None,
                segment_id: None,
            });
        }
        for block_id in missing {
            let level = if flush {
                RepairLevel::Block
            } else {
                RepairLevel::Segment
            };
            requests.push(RepairItem {
                level,
                first_object: self.object_id,
                last_object: self.object_id,
                block_id: Some(block_id),
                segment_id: None,
            });
        }
        true
    }

    fn is_repair_pending(&self, is_final: bool) -> bool {
        if self.repair_info_flag && !self.info_present {
            return true;
        }
        let relevant = self.blocks.values();
        if is_final {
            relevant.clone().last().is_some_and(|b| {
                !b.complete && b.symbol_count() < self.num_data as usize
            }) || self
                .blocks
                .values()
                .any(|b| !b.complete && b.symbol_count() < self.num_data as usize)
        } else {
            self.blocks
                .values()
                .any(|b| !b.complete && b.symbol_count() < self.num_data as usize)
        }
    }

    fn pending_mask_is_set(&self) -> bool {
        self.blocks.values().any(|b| b.pending.any_set())
    }

    fn reclaim_source_segments(&mut self) -> Vec<SegmentHandle> {
        let mut reclaimed = Vec::new();
        for block in self.blocks.values_mut() {
            if block.complete {
                reclaimed.extend(block.drain_segments());
            }
        }
        self.blocks.retain(|_, b| !b.complete);
        reclaimed
    }

    fn steal_oldest_block(&mut self) -> Option<Block> {
        let id = *self.blocks.keys().next()?;
        self.blocks.remove(&id)
    }

    fn steal_newest_block(&mut self) -> Option<Block> {
        let id = *self.blocks.keys().next_back()?;
        self.blocks.remove(&id)
    }
}
