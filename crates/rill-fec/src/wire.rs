//! # Parity Wire Framing
//!
//! Parity packets travel as transport control packets. The filter prepends
//! an 8-byte header to the parity shard, big-endian:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1|  subtype = 0x008          |            reserved             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        block id (16)        |  parity index (8) |    k (8)    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     parity shard (L bytes)                    |
//! ```
//!
//! The high bit marks a control packet in the transport's packet-type
//! scheme; the subtype field identifies FEC. A packet is classified as FEC
//! parity iff it is marked control AND its first word masks to the FEC
//! subtype. Other control packets are none of this filter's business.

use bytes::{Buf, BufMut};

/// Control bit + FEC subtype, as the first header word.
pub const FEC_MARKER: u32 = 0x8008_0000;

/// Mask selecting the control bit and subtype field of the first word.
pub const FEC_MARKER_MASK: u32 = 0xFFFF_0000;

/// Parity-packet extension header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParityHeader {
    /// Low 16 bits of the block's base sequence number.
    pub block_id: u16,
    /// Parity index within the block, in `[0, m)`.
    pub index: u8,
    /// Sender's source-shard count, echoed so a receiver can reject a
    /// mis-configured peer.
    pub k: u8,
}

impl ParityHeader {
    /// Encoded header size in bytes; the transport reserves this much in
    /// every control packet it offers to the filter.
    pub const SIZE: usize = 8;

    /// Whether a first header word carries the FEC marker.
    #[inline]
    pub fn matches(word: u32) -> bool {
        word & FEC_MARKER_MASK == FEC_MARKER
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(FEC_MARKER);
        buf.put_u32(
            (self.block_id as u32) << 16 | (self.index as u32) << 8 | self.k as u32,
        );
    }

    /// Decode from the front of a control payload. Returns `None` when the
    /// buffer is too short or the marker does not match.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::SIZE {
            return None;
        }
        let word = buf.get_u32();
        if !Self::matches(word) {
            return None;
        }
        let packed = buf.get_u32();
        Some(ParityHeader {
            block_id: (packed >> 16) as u16,
            index: (packed >> 8) as u8,
            k: packed as u8,
        })
    }
}
