//! # Command Intake (C9)
//!
//! CMD(APPLICATION) content queued as a FIFO of fixed-max-size buffers
//! drawn from a free-list pool (spec.md §4.9). Grounded on the teacher's
//! `pool.rs` free-list idiom (`PacketPool`'s slab of reusable entries),
//! scaled down to a plain `Vec`-backed free list since command buffers are
//! few and small relative to segment buffers.

use std::collections::VecDeque;

/// A single received application command's content.
#[derive(Debug, Clone, Default)]
pub struct CmdBuffer {
    content: Vec<u8>,
}

/// Result of `ReadNextCmd` (spec.md §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdReadResult {
    /// Nothing queued.
    Empty,
    /// Caller's buffer is too small (or absent); here's the required length.
    NeedsLen(usize),
    /// Dequeued and copied out; buffer returned to the pool.
    Dequeued(Vec<u8>),
}

/// FIFO of received CMD(APPLICATION) content with a bounded free-list pool.
#[derive(Debug)]
pub struct CommandQueue {
    free: Vec<CmdBuffer>,
    queue: VecDeque<CmdBuffer>,
    capacity: usize,
    max_content_len: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize, max_content_len: usize) -> Self {
        CommandQueue {
            free: Vec::new(),
            queue: VecDeque::new(),
            capacity,
            max_content_len,
        }
    }

    fn effective_max_len(&self) -> usize {
        if self.max_content_len == 0 {
            8192
        } else {
            self.max_content_len
        }
    }

    /// Enqueue received command content. Rejects content exceeding
    /// `segment_size` (or 8192 if none negotiated yet), and rejects if the
    /// free-list pool and outstanding queue together are at capacity.
    pub fn enqueue(&mut self, content: &[u8]) -> bool {
        if content.len() > self.effective_max_len() {
            return false;
        }
        if self.queue.len() >= self.capacity && self.free.is_empty() {
            return false;
        }
        let mut buf = self.free.pop().unwrap_or_default();
        buf.content.clear();
        buf.content.extend_from_slice(content);
        self.queue.push_back(buf);
        true
    }

    /// `ReadNextCmd(buffer, buflen*)`. `provided_buflen = None` models
    /// `buffer == null`: peek the required length without dequeuing.
    pub fn read_next(&mut self, provided_buflen: Option<usize>) -> CmdReadResult {
        let Some(front) = self.queue.front() else {
            return CmdReadResult::Empty;
        };
        match provided_buflen {
            None => CmdReadResult::NeedsLen(front.content.len()),
            Some(buflen) if buflen < front.content.len() => {
                CmdReadResult::NeedsLen(front.content.len())
            }
            Some(_) => {
                let mut buf = self.queue.pop_front().unwrap();
                let content = std::mem::take(&mut buf.content);
                self.release(buf);
                CmdReadResult::Dequeued(content)
            }
        }
    }

    fn release(&mut self, mut buf: CmdBuffer) {
        buf.content.clear();
        if self.free.len() < self.capacity {
            self.free.push(buf);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
