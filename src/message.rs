//! # Message Model & Quantization
//!
//! Wire parsing/packing of NORM header formats is an external collaborator
//! (spec.md §1 "Out of scope") — this module defines the already-decoded
//! message shapes the core consumes and emits (§6 "Wire protocol
//! (consumed)"), plus the quantization helpers the core needs to turn
//! wire-quantized fields (GRTT/RTT 8-bit log, rate 16-bit log, loss 32-bit
//! fraction) into the real-valued estimates the state machine reasons
//! about. Byte-level (de)serialization itself is not this crate's job.

use std::fmt;

/// A 16-bit object/block/segment id that wraps, compared via signed-delta
/// arithmetic per spec.md invariant 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SeqId16(pub u16);

impl SeqId16 {
    pub const ZERO: SeqId16 = SeqId16(0);

    /// Signed 16-bit delta `self - other`, wrap-aware (RFC 1982 style).
    #[inline]
    pub fn delta(self, other: SeqId16) -> i32 {
        (self.0.wrapping_sub(other.0) as i16) as i32
    }

    #[inline]
    pub fn wrapping_add(self, n: u16) -> SeqId16 {
        SeqId16(self.0.wrapping_add(n))
    }

    #[inline]
    pub fn wrapping_sub(self, n: u16) -> SeqId16 {
        SeqId16(self.0.wrapping_sub(n))
    }

    /// `self < other` under wrap-aware signed comparison.
    #[inline]
    pub fn precedes(self, other: SeqId16) -> bool {
        self.delta(other) < 0
    }
}

impl fmt::Display for SeqId16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Common header present on every NORM message (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub grtt_quantized: u8,
    pub group_size_quantized: u8,
    pub backoff_factor: u8,
    pub sender_id: u32,
    pub instance_id: u16,
}

/// FEC Object Transmission Information, carried on the first DATA/INFO
/// message of a stream of objects (spec.md §4.6, §7 "missing FTI").
#[derive(Debug, Clone, Copy)]
pub struct FecTransmissionInfo {
    pub fec_id: u8,
    pub fec_m: u8,
    pub segment_size: u16,
    pub num_data: u16,
    pub num_parity: u16,
}

/// FEC payload addressing for a single segment within an object.
#[derive(Debug, Clone, Copy)]
pub struct FecPayloadId {
    pub object_id: SeqId16,
    pub block_id: u32,
    pub segment_id: u16,
    /// `true` for the symbol immediately following the last source symbol
    /// of the final block in the final object ("transport the END flag").
    pub is_final: bool,
}

/// Kind of object referenced by an OBJECT-carrying message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Data,
    Stream,
}

/// A received OBJECT message (INFO or DATA) after external wire decode.
#[derive(Debug, Clone)]
pub struct ObjectMessage {
    pub header: MessageHeader,
    pub object_id: SeqId16,
    pub kind: ObjectKind,
    pub is_info: bool,
    pub is_repair: bool,
    pub is_stream: bool,
    pub fti: Option<FecTransmissionInfo>,
    pub payload_id: FecPayloadId,
    pub payload_len: u32,
}

/// Per-node CC state carried in a CMD(CC) node list, mirroring the
/// original implementation's `GetCCNode(nodeId, flags, rtt, loss)` lookup:
/// CLR/PLR is a per-node flag, not a position in the list.
#[derive(Debug, Clone, Copy)]
pub struct CcNodeEntry {
    pub node_id: u32,
    pub is_clr: bool,
    pub is_plr: bool,
    pub rtt_quantized: Option<u8>,
}

/// Commands carried in CMD messages (spec.md §4.10, §6).
#[derive(Debug, Clone)]
pub enum Command {
    /// Tells receivers which objects are invalid / advances sync.
    Squelch {
        sync_object_id: SeqId16,
        invalid_ids: Vec<SeqId16>,
    },
    /// Sender requests an immediate ACK from listed receivers.
    AckRequest { acking_node: u32 },
    /// Congestion-control probe.
    Cc {
        cc_sequence: u16,
        send_rate_quantized: u16,
        node_list: Vec<CcNodeEntry>,
    },
    /// Positive-ack watermark request.
    Flush {
        object_id: SeqId16,
        block_id: u32,
        segment_id: u16,
        acking_nodes: Vec<u32>,
    },
    /// Overheard repair advertisement from the sender, used for suppression.
    RepairAdv { requests: Vec<RepairItem> },
    /// Application-defined command payload.
    Application { content: Vec<u8> },
}

/// A message kind as routed by the sender-node controller (§4.10).
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Object(ObjectMessage),
    Cmd(Command),
    /// Overheard NACK from a peer receiver (used for suppression, §4.5).
    Nack {
        header: MessageHeader,
        requests: Vec<RepairItem>,
    },
    /// Overheard ACK from a peer receiver (used for CC suppression, §4.7).
    Ack {
        header: MessageHeader,
        cc_sequence: Option<u16>,
        rate_quantized: Option<u16>,
        rtt_confirmed: bool,
    },
}

/// Granularity of a single repair request / suppression entry (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepairLevel {
    Info,
    Object,
    Block,
    Segment,
}

/// One repair request item, as found in a NACK or REPAIR_ADV (§4.5).
#[derive(Debug, Clone)]
pub struct RepairItem {
    pub level: RepairLevel,
    pub first_object: SeqId16,
    pub last_object: SeqId16,
    pub block_id: Option<u32>,
    pub segment_id: Option<u16>,
}

/// CC feedback extension attached to an outbound NACK or ACK (§4.5 step 2, §4.7).
#[derive(Debug, Clone, Copy)]
pub struct CcFeedback {
    pub rtt_quantized: u8,
    pub loss_quantized: u32,
    pub rate_quantized: u16,
    pub cc_sequence: u16,
    pub start: bool,
}

/// An outbound NACK message (§4.5 step 4).
#[derive(Debug, Clone)]
pub struct OutboundNack {
    pub sender_id: u32,
    pub instance_id: u16,
    pub unicast: bool,
    pub cc_feedback: Option<CcFeedback>,
    pub requests: Vec<RepairItem>,
}

/// An outbound ACK message (CC or FLUSH variants, §4.7/§4.8).
#[derive(Debug, Clone)]
pub enum OutboundAck {
    Cc {
        sender_id: u32,
        instance_id: u16,
        cc_feedback: CcFeedback,
    },
    Flush {
        sender_id: u32,
        instance_id: u16,
        payload_id: FecPayloadId,
        cc_feedback: Option<CcFeedback>,
    },
}

// ─── Quantization ────────────────────────────────────────────────────────────

/// Dequantize an 8-bit log-quantized GRTT/RTT field into seconds.
///
/// Uses the same piecewise log scale shape the original implementation
/// relies on: small values are linear near zero, larger values are
/// logarithmically spaced up to a multi-hundred-second ceiling.
pub fn unquantize_rtt(q: u8) -> f64 {
    const RTT_MIN: f64 = 1.0e-6;
    const RTT_MAX: f64 = 1000.0;
    if q == 0 {
        return RTT_MIN;
    }
    let frac = q as f64 / 255.0;
    RTT_MIN * (RTT_MAX / RTT_MIN).powf(frac)
}

/// Quantize an RTT/GRTT value in seconds into the 8-bit log scale.
pub fn quantize_rtt(rtt: f64) -> u8 {
    const RTT_MIN: f64 = 1.0e-6;
    const RTT_MAX: f64 = 1000.0;
    let rtt = rtt.clamp(RTT_MIN, RTT_MAX);
    let frac = (rtt / RTT_MIN).ln() / (RTT_MAX / RTT_MIN).ln();
    (frac * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Dequantize a 16-bit log-quantized rate field into bytes/sec.
pub fn unquantize_rate(q: u16) -> f64 {
    const RATE_MIN: f64 = 1.0;
    const RATE_MAX: f64 = 1.0e9;
    if q == 0 {
        return 0.0;
    }
    let frac = q as f64 / 65535.0;
    RATE_MIN * (RATE_MAX / RATE_MIN).powf(frac)
}

/// Quantize a rate in bytes/sec into the 16-bit log scale.
pub fn quantize_rate(rate: f64) -> u16 {
    const RATE_MIN: f64 = 1.0;
    const RATE_MAX: f64 = 1.0e9;
    if rate <= 0.0 {
        return 0;
    }
    let rate = rate.clamp(RATE_MIN, RATE_MAX);
    let frac = (rate / RATE_MIN).ln() / (RATE_MAX / RATE_MIN).ln();
    (frac * 65535.0).round().clamp(0.0, 65535.0) as u16
}

/// Quantize a loss fraction (0.0-1.0) into a 32-bit fixed-point field.
pub fn quantize_loss(loss: f64) -> u32 {
    (loss.clamp(0.0, 1.0) * u32::MAX as f64) as u32
}

/// Dequantize a 32-bit fixed-point loss field back into a fraction.
pub fn unquantize_loss(q: u32) -> f64 {
    q as f64 / u32::MAX as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_id_delta_handles_wrap() {
        let a = SeqId16(5);
        let b = SeqId16(65530);
        // b is "before" a once wrapped: a - b should be small positive
        assert!(a.delta(b) > 0);
        assert!(b.precedes(a));
    }

    #[test]
    fn seq_id_precedes_simple() {
        assert!(SeqId16(1).precedes(SeqId16(2)));
        assert!(!SeqId16(2).precedes(SeqId16(1)));
        assert!(!SeqId16(2).precedes(SeqId16(2)));
    }

    #[test]
    fn rtt_quantize_roundtrip_monotonic() {
        let a = unquantize_rtt(quantize_rtt(0.01));
        let b = unquantize_rtt(quantize_rtt(0.1));
        let c = unquantize_rtt(quantize_rtt(1.0));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn rate_quantize_zero_is_zero() {
        assert_eq!(quantize_rate(0.0), 0);
        assert_eq!(unquantize_rate(0), 0.0);
    }

    #[test]
    fn loss_quantize_roundtrip_close() {
        let q = quantize_loss(0.05);
        let back = unquantize_loss(q);
        assert!((back - 0.05).abs() < 0.0001);
    }

    #[test]
    fn loss_quantize_clamped() {
        assert_eq!(quantize_loss(-1.0), 0);
        assert_eq!(quantize_loss(2.0), u32::MAX);
    }
}
