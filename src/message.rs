//! The wire message model.
//!
//! `Message` is a tagged sum: each variant carries exactly the fields that
//! kind needs. The wire shape is a flat bag of mostly-optional fields (for
//! compatibility with legacy senders that never adopted the tagged layout);
//! `RawMessage` is that bag, and `Message` converts to and from it via
//! `serde(try_from, into)`.
//!
//! The 2PC write-set has no field of its own on the wire (§6 enumerates a
//! closed field list); it rides inside `content` as a JSON object, the same
//! slot free-form alert text uses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type TxId = String;
pub type WriteSet = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawMessage {
    kind: String,
    sender_port: u16,
    sender_region: String,
    lamport_time: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    transaction_id: Option<TxId>,
    #[serde(default)]
    target_regions: Option<Vec<String>>,
    #[serde(default)]
    disaster_type: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    tips: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message kind {:?}", self.0)
    }
}

impl std::error::Error for UnknownKind {}

/// Outcome of [`decode`]: distinguishes a wire payload that isn't even valid
/// JSON-for-the-schema from one that is, but names a kind nobody speaks.
#[derive(Debug)]
pub enum DecodeError {
    Malformed(serde_json::Error),
    UnknownKind { kind: String, sender_port: u16, sender_region: String, ts: u64 },
}

/// Parse a wire payload, reporting unknown-kind separately from malformed
/// JSON so callers can still observe the sender's clock and reply with an
/// `ERROR` on the same connection (§7) instead of just dropping it.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let raw: RawMessage = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
    let sender_port = raw.sender_port;
    let sender_region = raw.sender_region.clone();
    let ts = raw.lamport_time;
    Message::try_from(raw).map_err(|UnknownKind(kind)| DecodeError::UnknownKind {
        kind,
        sender_port,
        sender_region,
        ts,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub enum Message {
    Alert {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        content: String,
        target_regions: Option<Vec<String>>,
    },
    Disaster {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        content: String,
        target_regions: Option<Vec<String>>,
        disaster_type: String,
        severity: String,
        tips: Vec<String>,
    },
    National {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        content: String,
        disaster_type: String,
        severity: String,
        tips: Vec<String>,
    },
    Request {
        sender_port: u16,
        sender_region: String,
        ts: u64,
    },
    Reply {
        sender_port: u16,
        sender_region: String,
        ts: u64,
    },
    Release {
        sender_port: u16,
        sender_region: String,
        ts: u64,
    },
    Prepare {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        transaction_id: TxId,
        writes: WriteSet,
    },
    Commit {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        transaction_id: TxId,
    },
    Abort {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        transaction_id: TxId,
    },
    VoteYes {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        transaction_id: TxId,
    },
    VoteNo {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        transaction_id: TxId,
    },
    Ack {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        transaction_id: TxId,
    },
    Error {
        sender_port: u16,
        sender_region: String,
        ts: u64,
        content: String,
    },
}

impl Message {
    pub fn sender_port(&self) -> u16 {
        self.fields().0
    }

    pub fn sender_region(&self) -> &str {
        self.fields().1
    }

    pub fn timestamp(&self) -> u64 {
        self.fields().2
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Message::Alert { .. } => "ALERT",
            Message::Disaster { .. } => "DISASTER",
            Message::National { .. } => "NATIONAL",
            Message::Request { .. } => "REQUEST",
            Message::Reply { .. } => "REPLY",
            Message::Release { .. } => "RELEASE",
            Message::Prepare { .. } => "PREPARE",
            Message::Commit { .. } => "COMMIT",
            Message::Abort { .. } => "ABORT",
            Message::VoteYes { .. } => "VOTE_YES",
            Message::VoteNo { .. } => "VOTE_NO",
            Message::Ack { .. } => "ACK",
            Message::Error { .. } => "ERROR",
        }
    }

    fn fields(&self) -> (u16, &str, u64) {
        match self {
            Message::Alert { sender_port, sender_region, ts, .. }
            | Message::Disaster { sender_port, sender_region, ts, .. }
            | Message::National { sender_port, sender_region, ts, .. }
            | Message::Request { sender_port, sender_region, ts }
            | Message::Reply { sender_port, sender_region, ts }
            | Message::Release { sender_port, sender_region, ts }
            | Message::Prepare { sender_port, sender_region, ts, .. }
            | Message::Commit { sender_port, sender_region, ts, .. }
            | Message::Abort { sender_port, sender_region, ts, .. }
            | Message::VoteYes { sender_port, sender_region, ts, .. }
            | Message::VoteNo { sender_port, sender_region, ts, .. }
            | Message::Ack { sender_port, sender_region, ts, .. }
            | Message::Error { sender_port, sender_region, ts, .. } => {
                (*sender_port, sender_region.as_str(), *ts)
            }
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Message::Prepare { transaction_id, .. }
            | Message::Commit { transaction_id, .. }
            | Message::Abort { transaction_id, .. }
            | Message::VoteYes { transaction_id, .. }
            | Message::VoteNo { transaction_id, .. }
            | Message::Ack { transaction_id, .. } => Some(transaction_id),
            _ => None,
        }
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = UnknownKind;

    fn try_from(raw: RawMessage) -> Result<Self, <Self as TryFrom<RawMessage>>::Error> {
        let sender_port = raw.sender_port;
        let sender_region = raw.sender_region;
        let ts = raw.lamport_time;

        let msg = match raw.kind.as_str() {
            "ALERT" => Message::Alert {
                sender_port,
                sender_region,
                ts,
                content: raw.content.unwrap_or_default(),
                target_regions: raw.target_regions,
            },
            "DISASTER" => Message::Disaster {
                sender_port,
                sender_region,
                ts,
                content: raw.content.unwrap_or_default(),
                target_regions: raw.target_regions,
                disaster_type: raw.disaster_type.unwrap_or_default(),
                severity: raw.severity.unwrap_or_default(),
                tips: raw.tips.unwrap_or_default(),
            },
            "NATIONAL" => Message::National {
                sender_port,
                sender_region,
                ts,
                content: raw.content.unwrap_or_default(),
                disaster_type: raw.disaster_type.unwrap_or_default(),
                severity: raw.severity.unwrap_or_default(),
                tips: raw.tips.unwrap_or_default(),
            },
            "REQUEST" => Message::Request { sender_port, sender_region, ts },
            "REPLY" => Message::Reply { sender_port, sender_region, ts },
            "RELEASE" => Message::Release { sender_port, sender_region, ts },
            "PREPARE" => Message::Prepare {
                sender_port,
                sender_region,
                ts,
                transaction_id: raw.transaction_id.unwrap_or_default(),
                writes: decode_writes(&raw.content.unwrap_or_default()),
            },
            "COMMIT" => Message::Commit {
                sender_port,
                sender_region,
                ts,
                transaction_id: raw.transaction_id.unwrap_or_default(),
            },
            "ABORT" => Message::Abort {
                sender_port,
                sender_region,
                ts,
                transaction_id: raw.transaction_id.unwrap_or_default(),
            },
            "VOTE_YES" => Message::VoteYes {
                sender_port,
                sender_region,
                ts,
                transaction_id: raw.transaction_id.unwrap_or_default(),
            },
            "VOTE_NO" => Message::VoteNo {
                sender_port,
                sender_region,
                ts,
                transaction_id: raw.transaction_id.unwrap_or_default(),
            },
            "ACK" => Message::Ack {
                sender_port,
                sender_region,
                ts,
                transaction_id: raw.transaction_id.unwrap_or_default(),
            },
            "ERROR" => Message::Error {
                sender_port,
                sender_region,
                ts,
                content: raw.content.unwrap_or_default(),
            },
            other => return Err(UnknownKind(other.to_string())),
        };
        Ok(msg)
    }
}

impl From<Message> for RawMessage {
    fn from(msg: Message) -> Self {
        let kind = msg.kind_str().to_string();
        let sender_port = msg.sender_port();
        let sender_region = msg.sender_region().to_string();
        let ts = msg.timestamp();

        match msg {
            Message::Alert { content, target_regions, .. } => RawMessage {
                kind,
                sender_port,
                sender_region,
                lamport_time: ts,
                content: Some(content),
                transaction_id: None,
                target_regions,
                disaster_type: None,
                severity: None,
                tips: None,
            },
            Message::Disaster { content, target_regions, disaster_type, severity, tips, .. } => RawMessage {
                kind,
                sender_port,
                sender_region,
                lamport_time: ts,
                content: Some(content),
                transaction_id: None,
                target_regions,
                disaster_type: Some(disaster_type),
                severity: Some(severity),
                tips: Some(tips),
            },
            Message::National { content, disaster_type, severity, tips, .. } => RawMessage {
                kind,
                sender_port,
                sender_region,
                lamport_time: ts,
                content: Some(content),
                transaction_id: None,
                target_regions: None,
                disaster_type: Some(disaster_type),
                severity: Some(severity),
                tips: Some(tips),
            },
            Message::Request { .. } | Message::Reply { .. } | Message::Release { .. } => RawMessage {
                kind,
                sender_port,
                sender_region,
                lamport_time: ts,
                content: None,
                transaction_id: None,
                target_regions: None,
                disaster_type: None,
                severity: None,
                tips: None,
            },
            Message::Prepare { transaction_id, writes, .. } => RawMessage {
                kind,
                sender_port,
                sender_region,
                lamport_time: ts,
                content: Some(encode_writes(&writes)),
                transaction_id: Some(transaction_id),
                target_regions: None,
                disaster_type: None,
                severity: None,
                tips: None,
            },
            Message::Commit { transaction_id, .. }
            | Message::Abort { transaction_id, .. }
            | Message::VoteYes { transaction_id, .. }
            | Message::VoteNo { transaction_id, .. }
            | Message::Ack { transaction_id, .. } => RawMessage {
                kind,
                sender_port,
                sender_region,
                lamport_time: ts,
                content: None,
                transaction_id: Some(transaction_id),
                target_regions: None,
                disaster_type: None,
                severity: None,
                tips: None,
            },
            Message::Error { content, .. } => RawMessage {
                kind,
                sender_port,
                sender_region,
                lamport_time: ts,
                content: Some(content),
                transaction_id: None,
                target_regions: None,
                disaster_type: None,
                severity: None,
                tips: None,
            },
        }
    }
}

fn encode_writes(writes: &WriteSet) -> String {
    serde_json::to_string(writes).unwrap_or_default()
}

fn decode_writes(content: &str) -> WriteSet {
    serde_json::from_str(content).unwrap_or_default()
}
