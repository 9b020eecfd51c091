//! # Pending-Object Bitmap (C4)
//!
//! A sliding bitmap indexed by object-id modulo a wrap range of at least
//! `2 * max_pending_range` (spec.md §4.3). Grounded on the teacher's
//! `arq.rs` windowed-tracking idiom (`LossDetector`'s `BTreeSet`-backed
//! received/nacked windows), reimplemented here as a fixed-size ring of
//! bits since the window extent is bounded and known up front.

use crate::message::SeqId16;

/// Sliding window of pending-object bits, keyed by object-id.
#[derive(Debug, Clone)]
pub struct PendingBitmap {
    bits: Vec<bool>,
    /// Object-id represented by `bits[0]`.
    base: SeqId16,
}

impl PendingBitmap {
    /// `range` is the representable window width in ids (spec.md §4.3:
    /// at least `2 * max_pending_range`).
    pub fn new(range: usize) -> Self {
        PendingBitmap {
            bits: vec![false; range.max(1)],
            base: SeqId16::ZERO,
        }
    }

    fn range(&self) -> usize {
        self.bits.len()
    }

    /// Whether `id` falls within the currently representable window.
    pub fn can_set(&self, id: SeqId16) -> bool {
        let delta = id.delta(self.base);
        delta >= 0 && (delta as usize) < self.range()
    }

    fn index_of(&self, id: SeqId16) -> Option<usize> {
        let delta = id.delta(self.base);
        if delta < 0 || delta as usize >= self.range() {
            None
        } else {
            Some(delta as usize)
        }
    }

    /// Re-anchor the window so `id` is representable, shifting bits that
    /// remain in range and dropping (clearing) any that fall out.
    pub fn rebase(&mut self, new_base: SeqId16) {
        if new_base == self.base {
            return;
        }
        let shift = new_base.delta(self.base);
        let range = self.range();
        let mut new_bits = vec![false; range];
        if shift.unsigned_abs() as usize  < range {
            if shift >= 0 {
                let shift = shift as usize;
                new_bits[..range - shift].copy_from_slice(&self.bits[shift..]);
            } else {
                let shift = (-shift) as usize;
                new_bits[shift..].copy_from_slice(&self.bits[..range - shift]);
            }
        }
        self.bits = new_bits;
        self.base = new_base;
    }

    pub fn set(&mut self, id: SeqId16) -> bool {
        match self.index_of(id) {
            Some(i) => {
                self.bits[i] = true;
                true
            }
            None => false,
        }
    }

    pub fn unset(&mut self, id: SeqId16) {
        if let Some(i) = self.index_of(id) {
            self.bits[i] = false;
        }
    }

    pub fn test(&self, id: SeqId16) -> bool {
        self.index_of(id).is_some_and(|i| self.bits[i])
    }

    pub fn set_bits(&mut self, first: SeqId16, n: usize) {
        for i in 0..n {
            self.set(first.wrapping_add(i as u16));
        }
    }

    pub fn unset_bits(&mut self, first: SeqId16, n: usize) {
        for i in 0..n {
            self.unset(first.wrapping_add(i as u16));
        }
    }

    pub fn first_set(&self) -> Option<SeqId16> {
        self.bits
            .iter()
            .position(|b| *b)
            .map(|i| self.base.wrapping_add(i as u16))
    }

    pub fn last_set(&self) -> Option<SeqId16> {
        self.bits
            .iter()
            .rposition(|b| *b)
            .map(|i| self.base.wrapping_add(i as u16))
    }

    pub fn clear_all(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
    }

    pub fn base(&self) -> SeqId16 {
        self.base
    }
}
