//! # Packet Types
//!
//! The structs the transport exchanges with a packet filter, and the
//! queue that carries rebuilt packets back to the transport.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// An outgoing source packet offered to `feed_source`.
#[derive(Debug, Clone)]
pub struct SourcePacket {
    pub seq: i32,
    pub timestamp: u32,
    /// Application payload, at most the negotiated shard length.
    pub payload: Bytes,
}

/// A control-packet slot the transport offers to `pack_control`. The
/// filter fills `buffer` (header + parity shard) and stamps `seq` and
/// `timestamp`.
#[derive(Debug, Default)]
pub struct ControlPacket {
    pub seq: i32,
    pub timestamp: u32,
    pub buffer: BytesMut,
}

impl ControlPacket {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A source packet rebuilt by the decoder, delivered through the provided
/// queue. The payload is always a full shard; the transport's duplicate
/// suppression reconciles it with any late copy of the real packet.
#[derive(Debug, Clone)]
pub struct RebuiltPacket {
    pub seq: i32,
    pub timestamp: u32,
    pub payload: Bytes,
}

/// Thread-safe queue of rebuilt packets, shared between the filter and the
/// transport's drain thread.
#[derive(Debug, Clone, Default)]
pub struct ProvidedQueue {
    inner: Arc<Mutex<VecDeque<RebuiltPacket>>>,
}

impl ProvidedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, pkt: RebuiltPacket) {
        self.inner.lock().expect("provided queue poisoned").push_back(pkt);
    }

    /// Take every queued packet, oldest first.
    pub fn drain(&self) -> Vec<RebuiltPacket> {
        self.inner
            .lock()
            .expect("provided queue poisoned")
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("provided queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
