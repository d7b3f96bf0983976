//! Crate-wide error taxonomy.
//!
//! Protocol engines never surface these to their callers: a lock conflict at a
//! participant is a `VoteNo`, not an `Err`. `MeshError` is reserved for the
//! genuine I/O, wire-format and configuration failures described in the
//! error-handling section of the design.

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reading response from {addr} timed out")]
    ReadTimeout { addr: String },

    #[error("malformed message from {addr}: {source}")]
    Malformed {
        addr: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown message kind {kind:?} from {addr}")]
    UnknownKind { addr: String, kind: String, sender_port: u16, sender_region: String, ts: u64 },

    #[error("invalid peer list entry {0:?}, expected host:port:region")]
    InvalidPeerEntry(String),
}

pub type MeshResult<T> = Result<T, MeshError>;
