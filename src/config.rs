//! # Configuration
//!
//! Per-session options inherited by every tracked sender (spec.md §6
//! "Configuration options"), plus the runtime configuration struct that
//! replaces the original implementation's compile-time build flags
//! (`SIMULATE`, `ASSUME_MDP_FEC`, `LIMIT_CC_RATE` — see DESIGN NOTES §9).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::object::{NackingMode, RepairBoundary, SyncPolicy};

/// Session-wide configuration, inherited by each per-sender `SenderState`
/// the first time a message from that sender is seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding object-window size (`max_pending_range`).
    pub rx_cache_max: u16,
    /// Retransmission persistence — repeat count for the activity timer.
    pub rx_robust_factor: u8,
    /// Sender-advertised robustness factor used for the activity interval.
    pub tx_robust_factor: u8,
    /// Default sync policy for newly-seen senders.
    pub default_sync_policy: SyncPolicy,
    /// Default repair granularity.
    pub default_repair_boundary: RepairBoundary,
    /// Default NACKing mode.
    pub default_nacking_mode: NackingMode,
    /// Whether NACKs are unicast to the sender rather than multicast to the group.
    pub unicast_nacks: bool,
    /// Ignore ECN-marked packets as loss signals for CC.
    pub ecn_ignore_loss: bool,
    /// Tolerate a configured amount of loss without CC backoff.
    pub cc_tolerate_loss: bool,
    /// Receiver is silent: track state but never transmit NACK/ACK.
    pub receiver_silent: bool,
    /// Receiver is realtime: prefer oldest-first buffer stealing.
    pub rcvr_realtime: bool,
    /// Ignore INFO messages for sync-policy purposes.
    pub rcvr_ignore_info: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            rx_cache_max: 256,
            rx_robust_factor: 20,
            tx_robust_factor: 20,
            default_sync_policy: SyncPolicy::Current,
            default_repair_boundary: RepairBoundary::Block,
            default_nacking_mode: NackingMode::Normal,
            unicast_nacks: false,
            ecn_ignore_loss: false,
            cc_tolerate_loss: false,
            receiver_silent: false,
            rcvr_realtime: false,
            rcvr_ignore_info: false,
        }
    }
}

/// Buffer pool sizing configuration (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Total memory budget in bytes for block + segment pools.
    pub block_memory_budget: usize,
    /// `f` in the §4.2 `seg_per_block` formula — fraction of a block's
    /// segment slots reserved for source (vs. parity) symbols. Resolves
    /// the "`buffer_factor` is hard-coded to 0.0" Open Question by making
    /// it configurable; default matches the original's hard-coded value.
    pub source_fraction: f64,
    /// Pointer size used in the `block_cost` formula (platform word size).
    pub ptr_size: usize,
    /// Extra bytes reserved per segment for stream headers.
    pub stream_header_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            block_memory_budget: 1_000_000,
            source_fraction: 0.0,
            ptr_size: std::mem::size_of::<usize>(),
            stream_header_bytes: 8,
        }
    }
}

/// Runtime configuration replacing the original's compile-time build flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Equivalent of `SIMULATE`: write received objects to an in-memory
    /// sink instead of the real object-storage collaborator.
    pub simulate_file: bool,
    /// Which FEC codec family to prefer when `fec_id` is ambiguous.
    pub fec_variant: FecVariant,
    /// Equivalent of `LIMIT_CC_RATE`: clamp the CC-calculated rate to the
    /// sender's advertised `send_rate` rather than letting feedback exceed it.
    pub cc_rate_limit: bool,
}

/// FEC codec family selection (DESIGN NOTES §9 — replaces `ASSUME_MDP_FEC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FecVariant {
    /// Reed-Solomon over GF(2^8) or GF(2^16), selected per `fec_id`/`fec_m`.
    #[default]
    ReedSolomon,
    /// Parity/MDP codec, used only when explicitly configured.
    ParityMdp,
}

/// Activity-timer interval per spec.md §4.8: `max(2 * tx_robust_factor * grtt, 1.0s)`.
pub fn activity_interval(tx_robust_factor: u8, grtt_estimate: f64) -> Duration {
    let secs = (2.0 * tx_robust_factor as f64 * grtt_estimate).max(1.0);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_defaults_match_spec() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.rx_cache_max, 256);
        assert_eq!(cfg.rx_robust_factor, 20);
        assert_eq!(cfg.default_sync_policy, SyncPolicy::Current);
        assert_eq!(cfg.default_repair_boundary, RepairBoundary::Block);
        assert_eq!(cfg.default_nacking_mode, NackingMode::Normal);
        assert!(!cfg.unicast_nacks);
    }

    #[test]
    fn pool_config_buffer_factor_defaults_zero() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.source_fraction, 0.0);
    }

    #[test]
    fn activity_interval_floor_is_one_second() {
        let d = activity_interval(1, 0.001);
        assert_eq!(d, Duration::from_secs_f64(1.0));
    }

    #[test]
    fn activity_interval_scales_with_grtt() {
        let d = activity_interval(20, 0.5);
        assert_eq!(d, Duration::from_secs_f64(20.0));
    }

    #[test]
    fn session_config_round_trips_through_json() {
        let cfg = SessionConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rx_cache_max, cfg.rx_cache_max);
        assert_eq!(back.default_sync_policy, cfg.default_sync_policy);
    }
}
