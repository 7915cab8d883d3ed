//! # rill-fec
//!
//! Reed–Solomon forward-error-correction packet filter for the rill
//! reliable-UDP streaming transport.
//!
//! The filter protects a live unicast stream against random loss by
//! transmitting `m` parity packets for every `k` source packets. The
//! receiver rebuilds up to `m` lost source packets per block without
//! retransmission; the transport's ARQ only kicks in for losses FEC could
//! not cover.
//!
//! ## Crate structure
//!
//! - [`gf256`] — GF(2^8) log/antilog tables and arithmetic
//! - [`rs`] — Reed-Solomon codec: systematic encode, erasure-only decode
//! - [`seq`] — signed wrap-aware sequence-space arithmetic
//! - [`wire`] — parity-packet header layout and classification
//! - [`packet`] — packet types and the rebuilt-packet queue
//! - [`config`] — filter config-string parsing and peer compatibility
//! - [`sender`] — send-side block assembler
//! - [`receiver`] — receive-side block tracker and decode driver
//! - [`filter`] — the `PacketFilter` trait, registry, and RS-FEC facade
//! - [`stats`] — per-filter counters

pub mod config;
pub mod filter;
pub mod gf256;
pub mod packet;
pub mod receiver;
pub mod rs;
pub mod sender;
pub mod seq;
pub mod stats;
pub mod wire;

pub use config::{ConfigError, FilterConfig, DEFAULT_CONFIG};
pub use filter::{ArqLevel, FilterInitializer, FilterInput, FilterRegistry, PacketFilter, RsFecFilter};
pub use packet::{ControlPacket, ProvidedQueue, RebuiltPacket, SourcePacket};
pub use rs::{DecodeError, RsCodec};
pub use stats::FilterStats;
