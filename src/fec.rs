//! # FEC Decoder Plugin Seam
//!
//! Concrete FEC math (Reed-Solomon 8/16-bit, parity-MDP) is an external
//! collaborator (spec.md §1, §6 "FEC decoder (plugin capability)"); this
//! module only defines the trait and the selection logic of spec.md §4.6.
//! Grounded on the teacher's `codec.rs` `FecEncoder`/`FecDecoder` shape
//! (init/encode/decode lifecycle), though the teacher's own codec math
//! (XOR-based) is out of scope here.

use crate::config::FecVariant;
use crate::error::NormError;

/// A pluggable FEC decoder (spec.md §6).
pub trait FecDecoder {
    /// Initialize for `(k, n, symbol_size)` — `k` source symbols, `n` total.
    fn init(&mut self, k: usize, n: usize, symbol_size: usize) -> Result<(), NormError>;

    /// Decode a block given the erasure/retrieval index lists and the
    /// symbol buffers (source slots first, then parity, `None` where
    /// erased). On success, the retrieval buffers for erased source
    /// indices are filled in place.
    fn decode(
        &mut self,
        erasure_loc: &[usize],
        retrieval_loc: &[usize],
        symbols: &mut [Option<Vec<u8>>],
    ) -> Result<(), NormError>;

    fn destroy(&mut self);
}

/// Identifies which concrete decoder family a `(fec_id, fec_m)` pair needs
/// (spec.md §4.6). Selection itself is pure bookkeeping; the actual decoder
/// instance is constructed by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    ReedSolomon8,
    ReedSolomon16,
    ParityMdp,
}

/// Choose the decoder family for `(fec_id, fec_m)` given the build's FEC
/// variant preference (replaces the original's `ASSUME_MDP_FEC` compile
/// flag — see `config::FecVariant`).
///
/// - `fec_id == 2` requires `fec_m ∈ {8, 16}` → RS8 or RS16.
/// - `fec_id == 5` → RS8.
/// - `fec_id == 129` → RS8 when `instance_id == 0`, else MDP if
///   `variant == FecVariant::ParityMdp`, else an error.
pub fn select_decoder(
    fec_id: u8,
    fec_m: u8,
    instance_id: u16,
    variant: FecVariant,
) -> Result<DecoderKind, NormError> {
    match fec_id {
        2 => match fec_m {
            8 => Ok(DecoderKind::ReedSolomon8),
            16 => Ok(DecoderKind::ReedSolomon16),
            _ => Err(NormError::UnsupportedFec { fec_id, fec_m }),
        },
        5 => Ok(DecoderKind::ReedSolomon8),
        129 => {
            if instance_id == 0 {
                Ok(DecoderKind::ReedSolomon8)
            } else if variant == FecVariant::ParityMdp {
                Ok(DecoderKind::ParityMdp)
            } else {
                Err(NormError::UnsupportedFec { fec_id, fec_m })
            }
        }
        _ => Err(NormError::UnsupportedFec { fec_id, fec_m }),
    }
}
