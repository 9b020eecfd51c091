//! # Error Taxonomy
//!
//! Mirrors the engine's error classes: configuration errors, resource
//! exhaustion, protocol violations, and the one fatal class (buffer init
//! failure) that is allowed to propagate out of a public API as `Err`.
//! Everything else is caught, logged, and the triggering item dropped —
//! see `node.rs` call sites.

use thiserror::Error;

/// Errors surfaced by the receiver-side per-sender engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormError {
    /// FEC codec id/m combination this build doesn't support.
    #[error("unsupported FEC parameters: fec_id={fec_id} fec_m={fec_m}")]
    UnsupportedFec { fec_id: u8, fec_m: u8 },

    /// First DATA message for a sender arrived with no FTI extension.
    #[error("missing FEC Object Transmission Information on first DATA message")]
    MissingFti,

    /// A NACK/REPAIR_ADV repair range failed to parse or was out of bounds.
    #[error("malformed repair range in message")]
    MalformedRepairRange,

    /// Block or segment pool had nothing free and stealing also failed.
    #[error("buffer pool exhausted (block and segment pools both empty)")]
    BufferPoolExhausted,

    /// Outbound message pool returned nothing.
    #[error("message pool exhausted")]
    MessagePoolExhausted,

    /// FEC decoder failed to initialize with the negotiated parameters.
    #[error("FEC decoder init failed: {0}")]
    DecoderInit(String),

    /// Buffer allocation failed during sender-node Open(); fatal for this sender.
    #[error("sender buffer allocation failed during open: {0}")]
    OpenFailed(String),
}
