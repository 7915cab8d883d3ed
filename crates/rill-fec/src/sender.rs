//! # Send-Side Block Assembler
//!
//! Buffers `k` outgoing source packets into fixed-length shards, computes
//! the `m` parity shards when the block fills, and hands parity packets to
//! the transport one at a time through `pack_control` polling. The
//! assembler never transmits anything itself.
//!
//! Operates on one block at a time: the transport feeds source packets in
//! send order, so a new block cannot start before the previous block's
//! parity has been polled out.

use quanta::Instant;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::packet::{ControlPacket, SourcePacket};
use crate::rs::RsCodec;
use crate::seq::seq_add;
use crate::stats::FilterStats;
use crate::wire::ParityHeader;

/// Assembles one send-side block at a time.
#[derive(Debug)]
pub struct BlockAssembler {
    codec: Arc<RsCodec>,
    payload_size: usize,
    /// Stale-group discard deadline; `None` disables the check.
    timeout: Option<Duration>,

    /// Sequence of the first buffered source packet; meaningful only while
    /// `collected > 0`.
    base: i32,
    /// Transport timestamp of the most recent source packet, stamped onto
    /// the block's parity packets.
    timestamp: u32,
    data: Vec<Vec<u8>>,
    collected: usize,
    parity: Vec<Vec<u8>>,
    parity_ready: bool,
    next_parity: usize,
    started_at: Option<Instant>,

    stats: FilterStats,
}

impl BlockAssembler {
    pub fn new(codec: Arc<RsCodec>, payload_size: usize, timeout: Option<Duration>) -> Self {
        let k = codec.k();
        let m = codec.m();
        BlockAssembler {
            codec,
            payload_size,
            timeout,
            base: 0,
            timestamp: 0,
            data: vec![vec![0u8; payload_size]; k],
            collected: 0,
            parity: vec![vec![0u8; payload_size]; m],
            parity_ready: false,
            next_parity: 0,
            started_at: None,
            stats: FilterStats::default(),
        }
    }

    /// Buffer one outgoing source packet. On the `k`-th packet the parity
    /// shards are computed and become available to `pack_control`.
    pub fn feed_source(&mut self, pkt: &SourcePacket) {
        self.discard_if_stale();

        if self.parity_ready {
            // The previous block's parity has not been polled out yet; the
            // transport is expected to interleave pack_control calls.
            debug!(seq = pkt.seq, "source packet while parity pending, not buffered");
            return;
        }

        if self.collected == 0 {
            self.base = pkt.seq;
            self.started_at = Some(Instant::now());
        }
        self.timestamp = pkt.timestamp;

        let shard = &mut self.data[self.collected];
        let len = pkt.payload.len().min(self.payload_size);
        shard[..len].copy_from_slice(&pkt.payload[..len]);
        shard[len..].fill(0);
        self.collected += 1;

        if self.collected == self.codec.k() {
            self.codec.encode_shards(&self.data, &mut self.parity);
            self.parity_ready = true;
            self.next_parity = 0;
        }
    }

    /// Supply the next parity packet of the current block, if any.
    ///
    /// Fills `out` with the wire header and parity shard, stamps its
    /// sequence (`base + k + index`) and the block timestamp. Returns
    /// `false` when there is nothing to send; after the last parity packet
    /// has been taken, the block resets to empty.
    pub fn pack_control(&mut self, out: &mut ControlPacket) -> bool {
        self.discard_if_stale();

        if !self.parity_ready {
            return false;
        }
        if self.next_parity == self.codec.m() {
            self.reset();
            return false;
        }

        let header = ParityHeader {
            block_id: self.base as u16,
            index: self.next_parity as u8,
            k: self.codec.k() as u8,
        };
        out.buffer.clear();
        out.buffer.reserve(ParityHeader::SIZE + self.payload_size);
        header.encode(&mut out.buffer);
        out.buffer.extend_from_slice(&self.parity[self.next_parity]);
        out.seq = seq_add(self.base, (self.codec.k() + self.next_parity) as i32);
        out.timestamp = self.timestamp;

        self.next_parity += 1;
        self.stats.parity_sent += 1;
        true
    }

    /// Number of source shards buffered in the current block.
    pub fn collected(&self) -> usize {
        self.collected
    }

    /// Whether parity for the current block is computed and pending.
    pub fn parity_pending(&self) -> bool {
        self.parity_ready && self.next_parity < self.codec.m()
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    fn reset(&mut self) {
        self.collected = 0;
        self.parity_ready = false;
        self.next_parity = 0;
        self.started_at = None;
    }

    /// Drop a partial group that outlived the flush deadline. Parity over a
    /// zero-padded partial block cannot be represented on the wire (the
    /// header's `k` echo is fixed), so the stale shards are discarded
    /// instead of flushed.
    fn discard_if_stale(&mut self) {
        let Some(deadline) = self.timeout else {
            return;
        };
        if self.parity_ready || self.collected == 0 {
            return;
        }
        if self
            .started_at
            .is_some_and(|t| t.elapsed() > deadline)
        {
            debug!(
                base = self.base,
                collected = self.collected,
                "discarding stale partial block"
            );
            self.stats.groups_discarded += 1;
            self.reset();
        }
    }
}
