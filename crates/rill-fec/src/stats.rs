//! # Filter Statistics
//!
//! Counters for both filter directions. The send and receive paths each own
//! a `FilterStats` guarded by their existing locks; [`FilterStats::merged`]
//! combines the two for a snapshot.

use serde::Serialize;

/// Aggregate per-filter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Parity packets handed to the transport.
    pub parity_sent: u64,
    /// Well-formed parity packets consumed on the receive side.
    pub parity_received: u64,
    /// Source packets rebuilt by the decoder.
    pub rebuilt: u64,
    /// Blocks that reached all-source-present (with or without decoding).
    pub blocks_completed: u64,
    /// Blocks evicted by TTL, age, or table capacity.
    pub blocks_evicted: u64,
    /// Evicted blocks that still had source shards missing.
    pub unrecoverable_blocks: u64,
    /// Erasure decodes that failed verification despite enough shards.
    pub decode_failures: u64,
    /// Parity packets dropped for a bad header or a `k` mismatch.
    pub malformed_headers: u64,
    /// Packets for sequence ranges the tracker no longer covers.
    pub out_of_window: u64,
    /// Partial send groups discarded by the flush deadline.
    pub groups_discarded: u64,
}

impl FilterStats {
    /// Field-wise sum of two counter sets.
    pub fn merged(&self, other: &FilterStats) -> FilterStats {
        FilterStats {
            parity_sent: self.parity_sent + other.parity_sent,
            parity_received: self.parity_received + other.parity_received,
            rebuilt: self.rebuilt + other.rebuilt,
            blocks_completed: self.blocks_completed + other.blocks_completed,
            blocks_evicted: self.blocks_evicted + other.blocks_evicted,
            unrecoverable_blocks: self.unrecoverable_blocks + other.unrecoverable_blocks,
            decode_failures: self.decode_failures + other.decode_failures,
            malformed_headers: self.malformed_headers + other.malformed_headers,
            out_of_window: self.out_of_window + other.out_of_window,
            groups_discarded: self.groups_discarded + other.groups_discarded,
        }
    }

    /// Fraction of tracked blocks that needed the decoder and got their
    /// packets back.
    pub fn recovery_ratio(&self) -> f64 {
        let finished = self.blocks_completed + self.unrecoverable_blocks;
        if finished == 0 {
            0.0
        } else {
            self.blocks_completed as f64 / finished as f64
        }
    }
}
