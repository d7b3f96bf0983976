//! Startup configuration: local identity, the peer set, and the timeouts
//! that govern transport and the 2PC coordinator's vote-gather deadline.

use std::time::Duration;

use crate::error::{MeshError, MeshResult};
use crate::region::{evacuation_location, normalize};

/// A remote peer as configured at startup: `(host, port, region)`. The set
/// of peers is immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
    pub region: String,
}

impl PeerAddr {
    /// Parse a `host:port:region` entry, the manual peer-list format.
    pub fn parse(entry: &str) -> MeshResult<Self> {
        let parts: Vec<&str> = entry.splitn(3, ':').collect();
        let [host, port, region] = parts.as_slice() else {
            return Err(MeshError::InvalidPeerEntry(entry.to_string()));
        };
        let port: u16 = port
            .parse()
            .map_err(|_| MeshError::InvalidPeerEntry(entry.to_string()))?;
        Ok(PeerAddr {
            host: host.to_string(),
            port,
            region: normalize(region),
        })
    }
}

#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub port: u16,
    pub region: String,
    pub evacuation_location: Option<&'static str>,
}

impl LocalIdentity {
    pub fn new(port: u16, region: &str) -> Self {
        let region = normalize(region);
        let evacuation_location = evacuation_location(&region);
        Self {
            port,
            region,
            evacuation_location,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Transport connect/read timeout, §4.2.
    pub transport_timeout: Duration,
    /// 2PC coordinator vote-gather deadline, §4.4.
    pub vote_deadline: Duration,
    /// Directory the per-peer event log is written into.
    pub log_dir: std::path::PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            transport_timeout: crate::transport::DEFAULT_TIMEOUT,
            vote_deadline: Duration::from_secs(5),
            log_dir: std::path::PathBuf::from("."),
        }
    }
}
