//! # Receive-Side Block Tracker
//!
//! Maps every inbound shard to its block, keeps per-block shard storage in
//! a slab arena bounded by `MAX_GROUPS`, a per-block TTL, and a sequence-age
//! horizon, and runs the erasure decoder as soon as a block holds at least
//! `k` shards with source positions missing. Rebuilt packets are pushed to
//! the provided queue the transport drains after every `receive` call.
//!
//! Blocks are identified by their base sequence. Source packets resolve
//! their block by grid arithmetic from the rolling `rcv_base`; parity
//! packets carry the low 16 bits of the base in their header, re-widened
//! against `rcv_base`.

use bytes::Bytes;
use quanta::Instant;
use slab::Slab;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::packet::{ProvidedQueue, RebuiltPacket};
use crate::rs::RsCodec;
use crate::seq::{block_index, seq_add, seq_offset};
use crate::stats::FilterStats;
use crate::wire::ParityHeader;

/// Most blocks tracked at once.
pub const MAX_GROUPS: usize = 64;

/// How long a block may sit in the table before eviction.
pub const BLOCK_TTL: Duration = Duration::from_secs(5);

/// Shard storage and bookkeeping for one block.
#[derive(Debug)]
struct RecvBlock {
    base: i32,
    data: Vec<Vec<u8>>,
    have_data: Vec<bool>,
    parity: Vec<Vec<u8>>,
    have_parity: Vec<bool>,
    /// Total shards stored, data and parity.
    have_count: usize,
    /// Transport timestamp of the first shard to arrive; stamps rebuilt
    /// packets.
    timestamp: u32,
    ts_set: bool,
    created_at: Instant,
    /// All source shards present (received or rebuilt); no further decode.
    done: bool,
    /// Last decode attempt failed verification. Retried when another shard
    /// arrives; suppresses the failure warning until a retry succeeds.
    failed: bool,
}

impl RecvBlock {
    fn new(base: i32, k: usize, m: usize, payload_size: usize) -> Self {
        RecvBlock {
            base,
            data: vec![vec![0u8; payload_size]; k],
            have_data: vec![false; k],
            parity: vec![vec![0u8; payload_size]; m],
            have_parity: vec![false; m],
            have_count: 0,
            timestamp: 0,
            ts_set: false,
            created_at: Instant::now(),
            done: false,
            failed: false,
        }
    }

    fn note_timestamp(&mut self, timestamp: u32) {
        if !self.ts_set {
            self.timestamp = timestamp;
            self.ts_set = true;
        }
    }
}

/// Receive-side state for one filter instance.
#[derive(Debug)]
pub struct BlockTracker {
    codec: Arc<RsCodec>,
    payload_size: usize,
    blocks: Slab<RecvBlock>,
    /// Block base → slab key.
    table: HashMap<i32, usize>,
    /// Oldest sequence the tracker still accepts; grid-aligned to the
    /// receive ISN and advanced past evicted blocks.
    rcv_base: i32,
    max_groups: usize,
    ttl: Duration,
    provided: ProvidedQueue,
    stats: FilterStats,
}

impl BlockTracker {
    pub fn new(
        codec: Arc<RsCodec>,
        payload_size: usize,
        rcv_isn: i32,
        max_groups: usize,
        ttl: Duration,
        provided: ProvidedQueue,
    ) -> Self {
        BlockTracker {
            codec,
            payload_size,
            blocks: Slab::with_capacity(max_groups),
            table: HashMap::with_capacity(max_groups),
            rcv_base: rcv_isn,
            max_groups,
            ttl,
            provided,
            stats: FilterStats::default(),
        }
    }

    /// Record an inbound source data packet.
    ///
    /// Always returns `true`: data packets continue to the application
    /// whatever the tracker thinks of them.
    pub fn receive_data(&mut self, seq: i32, timestamp: u32, payload: &[u8]) -> bool {
        if seq_offset(self.rcv_base, seq) < 0 {
            self.stats.out_of_window += 1;
            return true;
        }

        let n = self.codec.n();
        let idx = block_index(self.rcv_base, seq, n);
        if idx >= self.codec.k() {
            // Data in a parity slot means the peer runs a different
            // geometry; nothing to track.
            debug!(seq, idx, "data packet in a parity sequence slot");
            return true;
        }
        let base = seq_add(seq, -(idx as i32));

        self.garbage_collect(seq);
        if seq_offset(self.rcv_base, base) < 0 {
            self.stats.out_of_window += 1;
            return true;
        }

        let Some(key) = self.block_at(base) else {
            return true;
        };
        let block = &mut self.blocks[key];
        if block.done || block.have_data[idx] {
            return true;
        }
        block.note_timestamp(timestamp);
        let len = payload.len().min(self.payload_size);
        block.data[idx][..len].copy_from_slice(&payload[..len]);
        block.data[idx][len..].fill(0);
        block.have_data[idx] = true;
        block.have_count += 1;

        self.try_decode(key);
        true
    }

    /// Record an inbound parity packet.
    ///
    /// Always returns `false`: parity never reaches the application,
    /// whether it was stored, duplicate, stale, or malformed.
    pub fn receive_parity(&mut self, hdr: &ParityHeader, timestamp: u32, shard: &[u8]) -> bool {
        let k = self.codec.k();
        let m = self.codec.m();
        let n = self.codec.n();

        if hdr.k as usize != k || (hdr.index as usize) >= m || shard.len() != self.payload_size {
            self.stats.malformed_headers += 1;
            warn!(
                header_k = hdr.k,
                index = hdr.index,
                len = shard.len(),
                "dropping parity with mismatched header"
            );
            return false;
        }

        // Re-widen the 16-bit block id against the rolling base.
        let delta = hdr.block_id.wrapping_sub(self.rcv_base as u16) as i16 as i32;
        if delta < 0 {
            self.stats.out_of_window += 1;
            return false;
        }
        if delta as usize % n != 0 {
            self.stats.malformed_headers += 1;
            return false;
        }
        let base = seq_add(self.rcv_base, delta);

        self.garbage_collect(seq_add(base, (k + hdr.index as usize) as i32));
        if seq_offset(self.rcv_base, base) < 0 {
            self.stats.out_of_window += 1;
            return false;
        }

        let Some(key) = self.block_at(base) else {
            return false;
        };
        let block = &mut self.blocks[key];
        let pidx = hdr.index as usize;
        if block.done || block.have_parity[pidx] {
            return false;
        }
        block.note_timestamp(timestamp);
        block.parity[pidx].copy_from_slice(shard);
        block.have_parity[pidx] = true;
        block.have_count += 1;
        self.stats.parity_received += 1;

        self.try_decode(key);
        false
    }

    /// Count an FEC-marked packet whose header would not even parse.
    pub fn reject_malformed(&mut self) {
        self.stats.malformed_headers += 1;
        warn!("dropping truncated FEC control packet");
    }

    /// Number of blocks currently tracked.
    pub fn tracked_blocks(&self) -> usize {
        self.table.len()
    }

    /// Oldest sequence still accepted.
    pub fn rcv_base(&self) -> i32 {
        self.rcv_base
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Oldest distance (in packets) a block base may trail the newest
    /// sequence before it is evicted.
    fn max_age(&self) -> i32 {
        (self.max_groups * self.codec.n()) as i32
    }

    /// Look up or create the block for `base`, evicting the oldest block
    /// when the table is full. Returns `None` for a straggler older than
    /// everything tracked while the table is full; evicting a live block
    /// for it would only trade useful state for doomed state.
    fn block_at(&mut self, base: i32) -> Option<usize> {
        if let Some(&key) = self.table.get(&base) {
            return Some(key);
        }
        if self.table.len() >= self.max_groups {
            let oldest = self
                .table
                .keys()
                .copied()
                .min_by_key(|&b| seq_offset(self.rcv_base, b))?;
            if seq_offset(oldest, base) < 0 {
                self.stats.out_of_window += 1;
                return None;
            }
            self.evict(oldest);
        }
        let key = self.blocks.insert(RecvBlock::new(
            base,
            self.codec.k(),
            self.codec.m(),
            self.payload_size,
        ));
        self.table.insert(base, key);
        Some(key)
    }

    /// Evict blocks that exceeded the TTL or fell behind the age horizon
    /// relative to `newest`.
    fn garbage_collect(&mut self, newest: i32) {
        let max_age = self.max_age();
        let stale: Vec<i32> = self
            .table
            .iter()
            .filter(|&(&base, &key)| {
                seq_offset(base, newest) > max_age
                    || self.blocks[key].created_at.elapsed() > self.ttl
            })
            .map(|(&base, _)| base)
            .collect();
        for base in stale {
            self.evict(base);
        }
    }

    fn evict(&mut self, base: i32) {
        let Some(key) = self.table.remove(&base) else {
            return;
        };
        let block = self.blocks.remove(key);
        self.stats.blocks_evicted += 1;
        if !block.done {
            self.stats.unrecoverable_blocks += 1;
            debug!(
                base,
                have_count = block.have_count,
                "evicting incomplete block"
            );
        }
        let horizon = seq_add(base, self.codec.n() as i32);
        if seq_offset(self.rcv_base, horizon) > 0 {
            self.rcv_base = horizon;
        }
    }

    /// Decode the block when viable: at least `k` shards present and some
    /// source shard missing. Rebuilt packets go to the provided queue.
    fn try_decode(&mut self, key: usize) {
        let payload_size = self.payload_size;
        let BlockTracker {
            codec,
            blocks,
            provided,
            stats,
            ..
        } = self;

        let k = codec.k();
        let m = codec.m();
        let n = codec.n();
        let block = &mut blocks[key];

        if block.done || block.have_count < k {
            return;
        }

        let missing_data: Vec<usize> = (0..k).filter(|&i| !block.have_data[i]).collect();
        if missing_data.is_empty() {
            block.done = true;
            stats.blocks_completed += 1;
            return;
        }

        // have_count ≥ k bounds the erasure set by m.
        let mut erasures = missing_data.clone();
        erasures.extend((0..m).filter(|&p| !block.have_parity[p]).map(|p| k + p));
        debug_assert!(erasures.len() <= m);

        // Erased values must not leak garbage into the decoder.
        for &i in &missing_data {
            block.data[i].fill(0);
        }
        for p in 0..m {
            if !block.have_parity[p] {
                block.parity[p].fill(0);
            }
        }

        let mut cw = vec![0u8; n];
        for j in 0..payload_size {
            for i in 0..k {
                cw[i] = block.data[i][j];
            }
            for p in 0..m {
                cw[k + p] = block.parity[p][j];
            }
            if let Err(e) = codec.decode_erasures(&mut cw, &erasures) {
                stats.decode_failures += 1;
                if !block.failed {
                    block.failed = true;
                    warn!(
                        base = block.base,
                        column = j,
                        error = %e,
                        "erasure decode failed, keeping shards for retry"
                    );
                }
                return;
            }
            for &i in &missing_data {
                block.data[i][j] = cw[i];
            }
        }

        for &i in &missing_data {
            block.have_data[i] = true;
            block.have_count += 1;
            provided.push(RebuiltPacket {
                seq: seq_add(block.base, i as i32),
                timestamp: block.timestamp,
                payload: Bytes::copy_from_slice(&block.data[i]),
            });
            stats.rebuilt += 1;
        }
        block.done = true;
        block.failed = false;
        stats.blocks_completed += 1;
        debug!(base = block.base, rebuilt = missing_data.len(), "block decoded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEN: usize = 32;

    struct Fixture {
        tracker: BlockTracker,
        queue: ProvidedQueue,
        codec: Arc<RsCodec>,
    }

    fn fixture(k: usize, m: usize, isn: i32) -> Fixture {
        let codec = Arc::new(RsCodec::new(k, m).unwrap());
        let queue = ProvidedQueue::new();
        let tracker = BlockTracker::new(
            Arc::clone(&codec),
            LEN,
            isn,
            MAX_GROUPS,
            BLOCK_TTL,
            queue.clone(),
        );
        Fixture {
            tracker,
            queue,
            codec,
        }
    }

    /// Shards and parity for one block of sequentially-filled payloads.
    fn make_block(codec: &RsCodec, fill_base: u8) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let data: Vec<Vec<u8>> = (0..codec.k())
            .map(|i| vec![fill_base + i as u8; LEN])
            .collect();
        let mut parity = vec![vec![0u8; LEN]; codec.m()];
        codec.encode_shards(&data, &mut parity);
        (data, parity)
    }

    fn hdr(base: i32, index: usize, k: usize) -> ParityHeader {
        ParityHeader {
            block_id: base as u16,
            index: index as u8,
            k: k as u8,
        }
    }

    #[test]
    fn complete_block_without_loss_needs_no_rebuild() {
        let mut f = fixture(4, 2, 0);
        let (data, _) = make_block(&f.codec, 1);
        for (i, shard) in data.iter().enumerate() {
            assert!(f.tracker.receive_data(i as i32, 42, shard));
        }
        assert!(f.queue.is_empty());
        assert_eq!(f.tracker.stats().blocks_completed, 1);
    }

    #[test]
    fn single_loss_rebuilt_from_parity() {
        let mut f = fixture(4, 2, 0);
        let (data, parity) = make_block(&f.codec, 1);

        for (i, shard) in data.iter().enumerate() {
            if i == 2 {
                continue;
            }
            f.tracker.receive_data(i as i32, 42, shard);
        }
        assert!(!f.tracker.receive_parity(&hdr(0, 0, 4), 42, &parity[0]));

        let rebuilt = f.queue.drain();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].seq, 2);
        assert_eq!(rebuilt[0].timestamp, 42);
        assert_eq!(&rebuilt[0].payload[..], &data[2][..]);
    }

    #[test]
    fn parity_before_any_data_still_decodes() {
        let mut f = fixture(4, 2, 0);
        let (data, parity) = make_block(&f.codec, 1);

        // Both parity packets arrive first.
        f.tracker.receive_parity(&hdr(0, 0, 4), 7, &parity[0]);
        f.tracker.receive_parity(&hdr(0, 1, 4), 7, &parity[1]);
        // Then k−2 of the data packets.
        f.tracker.receive_data(0, 7, &data[0]);
        f.tracker.receive_data(3, 7, &data[3]);

        let mut rebuilt = f.queue.drain();
        rebuilt.sort_by_key(|p| p.seq);
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt[0].seq, 1);
        assert_eq!(&rebuilt[0].payload[..], &data[1][..]);
        assert_eq!(rebuilt[1].seq, 2);
        assert_eq!(&rebuilt[1].payload[..], &data[2][..]);
        // Timestamp comes from the first shard to arrive — the parity.
        assert_eq!(rebuilt[0].timestamp, 7);
    }

    #[test]
    fn over_capacity_loss_leaves_block_pending() {
        let mut f = fixture(4, 2, 0);
        let (data, parity) = make_block(&f.codec, 1);

        // Only one data shard and both parity: 3 < k, not viable.
        f.tracker.receive_data(3, 42, &data[3]);
        f.tracker.receive_parity(&hdr(0, 0, 4), 42, &parity[0]);
        f.tracker.receive_parity(&hdr(0, 1, 4), 42, &parity[1]);

        assert!(f.queue.is_empty());
        assert_eq!(f.tracker.stats().rebuilt, 0);
        assert_eq!(f.tracker.tracked_blocks(), 1);
    }

    #[test]
    fn duplicate_shards_do_not_bump_have_count() {
        let mut f = fixture(4, 2, 0);
        let (data, parity) = make_block(&f.codec, 1);

        f.tracker.receive_data(0, 42, &data[0]);
        f.tracker.receive_data(0, 42, &data[0]);
        f.tracker.receive_parity(&hdr(0, 0, 4), 42, &parity[0]);
        f.tracker.receive_parity(&hdr(0, 0, 4), 42, &parity[0]);

        assert_eq!(f.tracker.stats().parity_received, 1);
        // 2 distinct shards < k: no decode possible.
        assert!(f.queue.is_empty());
    }

    #[test]
    fn decoded_block_is_not_redecoded() {
        let mut f = fixture(2, 2, 0);
        let (data, parity) = make_block(&f.codec, 9);

        f.tracker.receive_data(0, 42, &data[0]);
        f.tracker.receive_parity(&hdr(0, 0, 2), 42, &parity[0]);
        assert_eq!(f.queue.drain().len(), 1);

        // The lost packet shows up late, then more parity: nothing new.
        f.tracker.receive_data(1, 42, &data[1]);
        f.tracker.receive_parity(&hdr(0, 1, 2), 42, &parity[1]);
        assert!(f.queue.is_empty());
        assert_eq!(f.tracker.stats().rebuilt, 1);
        assert_eq!(f.tracker.stats().blocks_completed, 1);
    }

    #[test]
    fn mismatched_k_parity_dropped() {
        let mut f = fixture(4, 2, 0);
        let (_, parity) = make_block(&f.codec, 1);

        assert!(!f.tracker.receive_parity(&hdr(0, 0, 5), 42, &parity[0]));
        assert_eq!(f.tracker.stats().malformed_headers, 1);
        assert_eq!(f.tracker.tracked_blocks(), 0);
    }

    #[test]
    fn misaligned_block_id_dropped() {
        let mut f = fixture(4, 2, 0);
        let (_, parity) = make_block(&f.codec, 1);

        // n = 6; block id 3 is not on the grid.
        let bad = ParityHeader {
            block_id: 3,
            index: 0,
            k: 4,
        };
        assert!(!f.tracker.receive_parity(&bad, 42, &parity[0]));
        assert_eq!(f.tracker.stats().malformed_headers, 1);
    }

    #[test]
    fn too_old_data_passes_through_untracked() {
        let mut f = fixture(4, 2, 600);
        let (data, _) = make_block(&f.codec, 1);

        assert!(f.tracker.receive_data(599, 42, &data[0]));
        assert_eq!(f.tracker.stats().out_of_window, 1);
        assert_eq!(f.tracker.tracked_blocks(), 0);
    }

    #[test]
    fn stale_parity_id_dropped_as_out_of_window() {
        let mut f = fixture(4, 2, 600);
        let (_, parity) = make_block(&f.codec, 1);

        // Block id re-widens to a base behind rcv_base.
        let old = ParityHeader {
            block_id: (600 - 6) as u16,
            index: 0,
            k: 4,
        };
        assert!(!f.tracker.receive_parity(&old, 42, &parity[0]));
        assert_eq!(f.tracker.stats().out_of_window, 1);
    }

    #[test]
    fn table_bounded_by_max_groups() {
        let codec = Arc::new(RsCodec::new(2, 1).unwrap());
        let queue = ProvidedQueue::new();
        let mut tracker = BlockTracker::new(
            Arc::clone(&codec),
            LEN,
            0,
            4,
            BLOCK_TTL,
            queue.clone(),
        );

        // One incomplete block per grid slot, far more than the bound.
        let n = codec.n() as i32;
        for b in 0..16 {
            tracker.receive_data(b * n, 0, &[b as u8; LEN]);
            assert!(tracker.tracked_blocks() <= 4);
        }
        assert!(tracker.stats().blocks_evicted >= 12);
        assert!(tracker.rcv_base() > 0);
    }

    #[test]
    fn age_horizon_evicts_and_advances_base() {
        let codec = Arc::new(RsCodec::new(2, 1).unwrap());
        let queue = ProvidedQueue::new();
        let mut tracker = BlockTracker::new(
            Arc::clone(&codec),
            LEN,
            0,
            4,
            BLOCK_TTL,
            queue.clone(),
        );
        let n = codec.n() as i32; // 3, max_age = 12

        tracker.receive_data(0, 0, &[1; LEN]);
        assert_eq!(tracker.tracked_blocks(), 1);

        // A packet far ahead pushes block 0 past the age horizon.
        tracker.receive_data(30, 0, &[2; LEN]);
        assert_eq!(tracker.tracked_blocks(), 1);
        assert_eq!(tracker.stats().blocks_evicted, 1);
        assert_eq!(tracker.stats().unrecoverable_blocks, 1);
        assert_eq!(tracker.rcv_base(), n);
    }

    #[test]
    fn ttl_evicts_idle_blocks() {
        let codec = Arc::new(RsCodec::new(2, 1).unwrap());
        let queue = ProvidedQueue::new();
        let mut tracker = BlockTracker::new(
            Arc::clone(&codec),
            LEN,
            0,
            MAX_GROUPS,
            Duration::from_millis(5),
            queue.clone(),
        );

        tracker.receive_data(0, 0, &[1; LEN]);
        std::thread::sleep(Duration::from_millis(20));
        // Any later packet sweeps the expired block out.
        tracker.receive_data(3, 0, &[2; LEN]);
        assert_eq!(tracker.stats().blocks_evicted, 1);
        assert_eq!(tracker.tracked_blocks(), 1);
    }

    #[test]
    fn rebuilt_sequences_follow_block_base() {
        let isn = 1200;
        let mut f = fixture(4, 2, isn);
        let (data, parity) = make_block(&f.codec, 3);

        // Second block of the stream: base = isn + n.
        let base = isn + 6;
        for (i, shard) in data.iter().enumerate() {
            if i == 1 {
                continue;
            }
            f.tracker.receive_data(base + i as i32, 42, shard);
        }
        f.tracker.receive_parity(&hdr(base, 1, 4), 42, &parity[1]);

        let rebuilt = f.queue.drain();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].seq, base + 1);
        assert_eq!(&rebuilt[0].payload[..], &data[1][..]);
    }
}
