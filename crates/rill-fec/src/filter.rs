//! # Packet-Filter Facade
//!
//! The capability surface the transport programs against, the registry it
//! uses to construct a filter by name, and the Reed-Solomon FEC
//! implementation of that surface.
//!
//! A filter instance is owned by one transport endpoint. The send path
//! (`feed_source`/`pack_control`) and the receive path (`receive`) touch
//! disjoint state behind separate locks, so the two directions may run on
//! different transport threads against the same instance.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::{ConfigError, FilterConfig};
use crate::packet::{ControlPacket, ProvidedQueue, SourcePacket};
use crate::receiver::{BlockTracker, BLOCK_TTL, MAX_GROUPS};
use crate::rs::RsCodec;
use crate::sender::BlockAssembler;
use crate::stats::FilterStats;
use crate::wire::ParityHeader;

/// How eagerly the transport should fall back to retransmission for
/// sequences a filter might still rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqLevel {
    /// Retransmit only when the application explicitly asks, giving the
    /// filter first chance at the gap.
    OnRequest,
}

/// Endpoint parameters a filter needs at construction time.
#[derive(Debug, Clone)]
pub struct FilterInitializer {
    /// First sequence number this endpoint will send.
    pub snd_isn: i32,
    /// First sequence number this endpoint expects to receive.
    pub rcv_isn: i32,
    /// Negotiated shard length L: every shard in a block is exactly this
    /// many bytes.
    pub payload_size: usize,
}

/// An inbound packet as the transport hands it to `receive`.
#[derive(Debug, Clone)]
pub struct FilterInput {
    pub seq: i32,
    pub timestamp: u32,
    /// Set when the transport classified the packet as control.
    pub is_control: bool,
    pub payload: Bytes,
}

/// The packet-filter capability interface.
pub trait PacketFilter: Send + Sync + std::fmt::Debug {
    /// Offer an outgoing source packet to the filter.
    fn feed_source(&self, pkt: &SourcePacket);

    /// Ask the filter for its next control packet. Returns `false` when it
    /// has nothing to send right now.
    fn pack_control(&self, out: &mut ControlPacket) -> bool;

    /// Run an inbound packet through the filter. Returns whether the
    /// transport should keep delivering the packet to the application.
    fn receive(&self, pkt: &FilterInput) -> bool;

    /// The retransmission policy the transport should apply around this
    /// filter.
    fn arq_level(&self) -> ArqLevel;

    /// Bytes the transport must reserve in control packets for this
    /// filter's header.
    fn extra_size(&self) -> usize;
}

// ─── Reed-Solomon FEC filter ────────────────────────────────────────────────

/// The Reed-Solomon FEC packet filter.
#[derive(Debug)]
pub struct RsFecFilter {
    config: FilterConfig,
    snd: Mutex<BlockAssembler>,
    rcv: Mutex<BlockTracker>,
}

impl RsFecFilter {
    /// Registered filter name.
    pub const NAME: &'static str = "rsfec";

    /// Parse `config_str`, build the GF tables and codec, and allocate the
    /// block state. Fails only on configuration errors.
    pub fn new(
        config_str: &str,
        provided: ProvidedQueue,
        init: &FilterInitializer,
    ) -> Result<Self, ConfigError> {
        let config = FilterConfig::parse(config_str)?;
        let codec = Arc::new(RsCodec::new(config.k, config.m)?);

        let snd = BlockAssembler::new(Arc::clone(&codec), init.payload_size, config.timeout);
        let rcv = BlockTracker::new(
            codec,
            init.payload_size,
            init.rcv_isn,
            MAX_GROUPS,
            BLOCK_TTL,
            provided,
        );

        Ok(RsFecFilter {
            config,
            snd: Mutex::new(snd),
            rcv: Mutex::new(rcv),
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Combined counters from both directions.
    pub fn stats(&self) -> FilterStats {
        let snd = self.snd.lock().expect("sender lock poisoned").stats();
        let rcv = self.rcv.lock().expect("tracker lock poisoned").stats();
        snd.merged(&rcv)
    }
}

impl PacketFilter for RsFecFilter {
    fn feed_source(&self, pkt: &SourcePacket) {
        self.snd.lock().expect("sender lock poisoned").feed_source(pkt);
    }

    fn pack_control(&self, out: &mut ControlPacket) -> bool {
        self.snd
            .lock()
            .expect("sender lock poisoned")
            .pack_control(out)
    }

    fn receive(&self, pkt: &FilterInput) -> bool {
        if pkt.is_control {
            let marked = pkt.payload.len() >= 4 && {
                let mut word = [0u8; 4];
                word.copy_from_slice(&pkt.payload[..4]);
                ParityHeader::matches(u32::from_be_bytes(word))
            };
            if !marked {
                // Some other subsystem's control packet; not ours to eat.
                return true;
            }
            let mut rcv = self.rcv.lock().expect("tracker lock poisoned");
            let mut buf = pkt.payload.clone();
            match ParityHeader::decode(&mut buf) {
                // `buf` now starts at the parity shard.
                Some(hdr) => rcv.receive_parity(&hdr, pkt.timestamp, &buf),
                // FEC-marked but truncated: drop, never deliver.
                None => {
                    rcv.reject_malformed();
                    false
                }
            }
        } else {
            self.rcv
                .lock()
                .expect("tracker lock poisoned")
                .receive_data(pkt.seq, pkt.timestamp, &pkt.payload)
        }
    }

    fn arq_level(&self) -> ArqLevel {
        ArqLevel::OnRequest
    }

    fn extra_size(&self) -> usize {
        ParityHeader::SIZE
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

type FilterCtor =
    fn(&str, ProvidedQueue, &FilterInitializer) -> Result<Box<dyn PacketFilter>, ConfigError>;

/// Name → constructor map the transport selects filters from.
///
/// Builtin names cannot be shadowed by later registrations.
pub struct FilterRegistry {
    ctors: HashMap<String, FilterCtor>,
    builtin: HashSet<String>,
}

impl FilterRegistry {
    /// A registry with the builtin filters present.
    pub fn new() -> Self {
        let mut reg = FilterRegistry {
            ctors: HashMap::new(),
            builtin: HashSet::new(),
        };
        reg.ctors.insert(RsFecFilter::NAME.to_string(), |cfg, q, init| {
            Ok(Box::new(RsFecFilter::new(cfg, q, init)?))
        });
        reg.builtin.insert(RsFecFilter::NAME.to_string());
        reg
    }

    /// Register an external filter constructor under `name`.
    pub fn register(&mut self, name: &str, ctor: FilterCtor) -> Result<(), ConfigError> {
        if self.builtin.contains(name) || self.ctors.contains_key(name) {
            return Err(ConfigError::DuplicateFilter(name.to_string()));
        }
        self.ctors.insert(name.to_string(), ctor);
        Ok(())
    }

    /// Construct the filter a config string names.
    pub fn create(
        &self,
        config_str: &str,
        provided: ProvidedQueue,
        init: &FilterInitializer,
    ) -> Result<Box<dyn PacketFilter>, ConfigError> {
        let name = config_str
            .split(',')
            .next()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or(ConfigError::Empty)?;
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownFilter(name.to_string()))?;
        ctor(config_str, provided, init)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
