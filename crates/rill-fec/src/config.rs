//! # Filter Configuration
//!
//! Filter config strings follow the transport's `name,key:value,...` shape,
//! e.g. `"rsfec,k:10,parity:2"`. The keys this filter recognizes:
//!
//! | key | aliases | range | meaning |
//! |---|---|---|---|
//! | `k` | `cols` | 1..=255 | source shards per block (mandatory) |
//! | `m` | `parity`, `rows` | 1..=255 | parity shards per block (default 1) |
//! | `timeout` | — | ≥ 0 ms | stale-group discard deadline; 0 disables |
//!
//! `k + m` must not exceed 255 (the symbol count of GF(2^8) minus one).

use std::time::Duration;
use thiserror::Error;

/// Configuration used when the caller supplies none.
pub const DEFAULT_CONFIG: &str = "rsfec,k:10,parity:2";

/// Construction-time configuration failure. The filter is not instantiated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("empty filter config")]
    Empty,
    #[error("missing mandatory parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("bad value for '{key}': {value}")]
    BadValue { key: String, value: String },
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("{what} must be in 1..=255, got {got}")]
    OutOfRange { what: &'static str, got: usize },
    #[error("k + m must not exceed 255, got {0}")]
    GeometryTooLarge(usize),
    #[error("peer filter config incompatible on '{0}'")]
    Incompatible(&'static str),
    #[error("no filter registered under '{0}'")]
    UnknownFilter(String),
    #[error("filter name '{0}' is already registered")]
    DuplicateFilter(String),
}

/// Range check shared by the config parser and the codec constructor.
pub fn validate_geometry(k: usize, m: usize) -> Result<(), ConfigError> {
    if !(1..=255).contains(&k) {
        return Err(ConfigError::OutOfRange { what: "k", got: k });
    }
    if !(1..=255).contains(&m) {
        return Err(ConfigError::OutOfRange { what: "m", got: m });
    }
    if k + m > 255 {
        return Err(ConfigError::GeometryTooLarge(k + m));
    }
    Ok(())
}

/// Parsed and validated filter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    /// Filter name, the first config token.
    pub name: String,
    /// Source shards per block.
    pub k: usize,
    /// Parity shards per block.
    pub m: usize,
    /// Stale-group discard deadline; `None` when disabled.
    pub timeout: Option<Duration>,
}

impl FilterConfig {
    /// Parse a `name,key:value,...` config string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut parts = s.split(',').map(str::trim);
        let name = match parts.next() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => return Err(ConfigError::Empty),
        };

        let mut k: Option<usize> = None;
        let mut m: Option<usize> = None;
        let mut timeout_ms: u64 = 0;

        for part in parts {
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once(':')
                .ok_or_else(|| ConfigError::BadValue {
                    key: part.to_string(),
                    value: String::new(),
                })?;
            let bad = || ConfigError::BadValue {
                key: key.to_string(),
                value: value.to_string(),
            };
            match key {
                "k" | "cols" => k = Some(value.parse().map_err(|_| bad())?),
                "m" | "parity" | "rows" => m = Some(value.parse().map_err(|_| bad())?),
                "timeout" => timeout_ms = value.parse().map_err(|_| bad())?,
                _ => return Err(ConfigError::UnknownParameter(key.to_string())),
            }
        }

        let k = k.ok_or(ConfigError::MissingParameter("k"))?;
        let m = m.unwrap_or(1);
        validate_geometry(k, m)?;

        Ok(FilterConfig {
            name,
            k,
            m,
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        })
    }

    /// Check that a peer's configuration agrees with ours. Both sides must
    /// run the same filter with the same block geometry; `timeout` is a
    /// local sender knob and does not have to match.
    pub fn check_compat(&self, peer: &FilterConfig) -> Result<(), ConfigError> {
        if self.name != peer.name {
            return Err(ConfigError::Incompatible("name"));
        }
        if self.k != peer.k {
            return Err(ConfigError::Incompatible("k"));
        }
        if self.m != peer.m {
            return Err(ConfigError::Incompatible("m"));
        }
        Ok(())
    }
}
