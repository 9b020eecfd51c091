//! # Buffer Pools (C3)
//!
//! Fixed-capacity Block and Segment pools plus the steal-under-pressure
//! acquisition contract of spec.md §4.2. Grounded on the teacher's
//! `pool.rs`: a `Slab`-backed store for segment buffers (mirroring
//! `PacketPool`'s `Slab<PacketEntry>`), plus a plain free-list `Vec` for
//! the smaller, struct-shaped Block pool.

use std::collections::BTreeMap;

use slab::Slab;

use crate::config::PoolConfig;
use crate::message::SeqId16;
use crate::object::{Block, Object, SegmentHandle};

/// Fixed-capacity pool of pre-sized `Block` structures.
#[derive(Debug)]
pub struct BlockPool {
    free: Vec<Block>,
    capacity: usize,
    slots_per_block: usize,
}

impl BlockPool {
    pub fn new(capacity: usize, slots_per_block: usize) -> Self {
        let free = (0..capacity)
            .map(|_| Block::new(0, slots_per_block))
            .collect();
        BlockPool {
            free,
            capacity,
            slots_per_block,
        }
    }

    pub fn acquire(&mut self) -> Option<Block> {
        self.free.pop()
    }

    /// Return a block to the pool. Caller must have already drained its
    /// segments (spec.md §4.2 invariant: "a stolen block empties its
    /// segments back into the segment pool").
    pub fn release(&mut self, mut block: Block) {
        if self.free.len() < self.capacity {
            block.block_id = 0;
            block.complete = false;
            block.pending.clear();
            block.repair.clear();
            self.free.push(block);
        }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slots_per_block(&self) -> usize {
        self.slots_per_block
    }
}

/// Fixed-capacity pool of segment byte buffers, `Slab`-backed for O(1)
/// handle-based acquire/release.
#[derive(Debug)]
pub struct SegmentPool {
    slab: Slab<Vec<u8>>,
    capacity: usize,
    segment_len: usize,
}

impl SegmentPool {
    pub fn new(capacity: usize, segment_len: usize) -> Self {
        SegmentPool {
            slab: Slab::with_capacity(capacity),
            capacity,
            segment_len,
        }
    }

    pub fn acquire(&mut self) -> Option<SegmentHandle> {
        if self.slab.len() >= self.capacity {
            return None;
        }
        let key = self.slab.insert(vec![0u8; self.segment_len]);
        Some(SegmentHandle(key))
    }

    pub fn release(&mut self, handle: SegmentHandle) {
        if self.slab.contains(handle.0) {
            self.slab.remove(handle.0);
        }
    }

    pub fn get(&self, handle: SegmentHandle) -> Option<&[u8]> {
        self.slab.get(handle.0).map(|v| v.as_slice())
    }

    pub fn get_mut(&mut self, handle: SegmentHandle) -> Option<&mut Vec<u8>> {
        self.slab.get_mut(handle.0)
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slab.len() >= self.capacity
    }
}

/// Scratch buffers for FEC decode of erased source symbols (spec.md §4.2
/// "retrieval pool"), sized `num_data`, one segment each.
#[derive(Debug)]
pub struct RetrievalPool {
    buffers: Vec<Vec<u8>>,
}

impl RetrievalPool {
    pub fn new(num_data: usize, segment_len: usize) -> Self {
        RetrievalPool {
            buffers: vec![vec![0u8; segment_len]; num_data],
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Vec<u8>> {
        self.buffers.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}

/// Result of the §4.2 sizing computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizing {
    pub seg_per_block: usize,
    pub num_blocks: usize,
    pub num_segments: usize,
}

/// Compute block/segment pool sizes per spec.md §4.2's first-allocation
/// formula, given the FEC parameters learned from FTI.
pub fn compute_pool_sizing(
    num_data: u16,
    num_parity: u16,
    segment_size: u16,
    cfg: &PoolConfig,
) -> PoolSizing {
    let num_data_f = num_data as f64;
    let num_parity_f = num_parity as f64;

    let seg_per_block = if num_parity == 0 {
        0
    } else {
        let raw = cfg.source_fraction * num_data_f + (1.0 - cfg.source_fraction) * num_parity_f;
        (raw.round() as i64).clamp(0, num_data as i64) as usize
    };

    let total_slots = num_data as usize + num_parity as usize;
    let mask_bytes = total_slots.div_ceil(8);
    let block_struct_size = std::mem::size_of::<usize>() * 4; // approximate Block overhead
    let block_cost = block_struct_size + total_slots * cfg.ptr_size + 2 * mask_bytes;
    let segment_cost = seg_per_block * (segment_size as usize + cfg.stream_header_bytes);

    let per_block_total = (block_cost + segment_cost).max(1);
    let num_blocks = cfg.block_memory_budget.div_ceil(per_block_total).max(2);
    let num_segments = num_blocks * seg_per_block;

    PoolSizing {
        seg_per_block,
        num_blocks,
        num_segments,
    }
}

/// `true` when stealing should walk oldest-first (spec.md §4.2: "when the
/// session is silent or realtime").
fn steals_oldest_first(silent: bool, realtime: bool) -> bool {
    silent || realtime
}

/// Steal a block from the object table under pool pressure (spec.md §4.2
/// `GetFreeBlock`). Returns the stolen block's owning object id and the
/// block itself; the caller is responsible for draining its segments back
/// into the `SegmentPool`.
pub fn steal_block(
    rx_table: &mut BTreeMap<SeqId16, Object>,
    requester: SeqId16,
    silent: bool,
    realtime: bool,
) -> Option<(SeqId16, Block)> {
    if steals_oldest_first(silent, realtime) {
        let candidate_id = *rx_table.range(..=requester).next()?.0;
        let obj = rx_table.get_mut(&candidate_id)?;
        let block = obj.steal_oldest_block()?;
        Some((candidate_id, block))
    } else {
        let candidate_id = *rx_table.range(requester..).next_back()?.0;
        let obj = rx_table.get_mut(&candidate_id)?;
        let block = obj.steal_newest_block()?;
        Some((candidate_id, block))
    }
}

/// `GetFreeBlock`: acquire from the pool, else steal (spec.md §4.2).
/// The stolen block's segments are drained straight back into
/// `segment_pool` before the (now-empty) block is returned to the caller.
pub fn get_free_block(
    block_pool: &mut BlockPool,
    segment_pool: &mut SegmentPool,
    rx_table: &mut BTreeMap<SeqId16, Object>,
    requester: SeqId16,
    silent: bool,
    realtime: bool,
) -> Option<Block> {
    if let Some(b) = block_pool.acquire() {
        return Some(b);
    }
    let (_, mut stolen) = steal_block(rx_table, requester, silent, realtime)?;
    for handle in stolen.drain_segments() {
        segment_pool.release(handle);
    }
    Some(stolen)
}

/// `GetFreeSegment`: acquire from the pool, else steal a whole block to
/// free up segments, keep one, and return the rest to the pool.
pub fn get_free_segment(
    block_pool: &mut BlockPool,
    segment_pool: &mut SegmentPool,
    rx_table: &mut BTreeMap<SeqId16, Object>,
    requester: SeqId16,
    silent: bool,
    realtime: bool,
) -> Option<SegmentHandle> {
    if let Some(h) = segment_pool.acquire() {
        return Some(h);
    }
    let (_, mut stolen) = steal_block(rx_table, requester, silent, realtime)?;
    let freed = stolen.drain_segments();
    block_pool.release(stolen);
    let mut iter = freed.into_iter();
    let keep = iter.next();
    for extra in iter {
        segment_pool.release(extra);
    }
    keep.or_else(|| segment_pool.acquire())
}
