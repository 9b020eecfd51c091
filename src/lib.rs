//! # norm-rx-engine
//!
//! Receiver-side per-sender state machine for a NACK-oriented reliable
//! multicast protocol: sliding-window sync, repair backoff/suppression,
//! TFRC-style congestion feedback, and FEC block/segment buffer management.
//! Wire (de)serialization and the concrete FEC codec math are external
//! collaborators — see [`message`] and [`fec`].
//!
//! ## Crate structure
//!
//! - [`error`] — error taxonomy
//! - [`config`] — session/pool configuration
//! - [`timer`] — three-phase backoff/holdoff timer shared by every subsystem
//! - [`message`] — decoded wire message shapes and quantization helpers
//! - [`collab`] — session/multiplexer collaborator trait
//! - [`fec`] — pluggable FEC decoder seam and codec selection
//! - [`object`] — Object/Block/Segment data model and the NACK engine's view of it
//! - [`bitmap`] — sliding pending-object bitmap
//! - [`pool`] — block/segment/retrieval buffer pools with steal-under-pressure
//! - [`node_index`] — generic per-sender lookup table
//! - [`rand_util`] — randomized backoff sampling
//! - [`loss`] — TFRC-style loss-event history
//! - [`congestion`] — receive-rate tracking and the TFRC rate equation
//! - [`sync`] — sliding-window synchronization engine
//! - [`repair`] — NACK backoff/suppression engine
//! - [`activity`] — sender-inactivity detection and watermark ACK
//! - [`command`] — application command intake queue
//! - [`node`] — per-sender controller tying every subsystem together

pub mod activity;
pub mod bitmap;
pub mod collab;
pub mod command;
pub mod config;
pub mod congestion;
pub mod error;
pub mod fec;
pub mod loss;
pub mod message;
pub mod node;
pub mod node_index;
pub mod object;
pub mod pool;
pub mod rand_util;
pub mod repair;
pub mod sync;
pub mod timer;
