//! Single inbound routing point, §4.6.
//!
//! One `Dispatcher` per peer owns references to every protocol engine; an
//! accepted connection is read once, routed by message kind, and — for
//! request/response kinds — answered on the same connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::clock::LamportClock;
use crate::config::{LocalIdentity, PeerAddr};
use crate::error::MeshError;
use crate::eventlog::EventLog;
use crate::message::Message;
use crate::mutex::MutexEngine;
use crate::region;
use crate::transport;
use crate::twopc::Participant;

pub struct Dispatcher {
    pub local: LocalIdentity,
    pub peers: Vec<PeerAddr>,
    pub clock: Arc<LamportClock>,
    pub mutex_engine: Arc<MutexEngine>,
    pub participant: Arc<Participant>,
    pub event_log: Arc<EventLog>,
    pub timeout: Duration,
}

impl Dispatcher {
    /// Handle one accepted connection end to end: read, tick the clock,
    /// route, and (for kinds that expect one) write a response.
    pub async fn handle_connection(&self, mut stream: TcpStream, peer: std::net::SocketAddr) {
        let msg = match transport::read_one(&mut stream, peer).await {
            Ok(msg) => msg,
            Err(MeshError::UnknownKind { kind, sender_port, sender_region, ts, .. }) => {
                tracing::warn!(%peer, kind, sender_port, "unknown message kind, replying with ERROR");
                self.clock.observe(ts);
                let response = Message::Error {
                    sender_port: self.local.port,
                    sender_region: self.local.region.clone(),
                    ts: self.clock.tick(),
                    content: format!("unknown message kind {kind:?} from {sender_region}"),
                };
                if let Err(err) = transport::write_one(&mut stream, peer, &response).await {
                    tracing::warn!(%peer, error = %err, "failed to write error response");
                }
                return;
            }
            Err(err) => {
                tracing::warn!(%peer, error = %err, "dropping malformed inbound message");
                return;
            }
        };

        self.clock.observe(msg.timestamp());
        self.event_log.record(self.clock.read(), &format!("recv {} from {}", msg.kind_str(), msg.sender_port()));

        if let Some(response) = self.route(msg).await {
            if let Err(err) = transport::write_one(&mut stream, peer, &response).await {
                tracing::warn!(%peer, error = %err, "failed to write response");
            }
        }
    }

    /// Route one already-clock-ticked message. Returns `Some` when the kind
    /// expects a same-connection response.
    async fn route(&self, msg: Message) -> Option<Message> {
        match msg {
            Message::Alert { sender_region, content, target_regions, .. } => {
                self.deliver_alert(&sender_region, &content, target_regions.as_deref(), false);
                None
            }
            Message::Disaster { sender_region, content, target_regions, disaster_type, severity, tips, .. } => {
                let mut text = content;
                text.push_str(&format!(" [{disaster_type}/{severity}] tips: {}", tips.join("; ")));
                self.deliver_alert(&sender_region, &text, target_regions.as_deref(), false);
                None
            }
            Message::National { sender_region, content, disaster_type, severity, tips, .. } => {
                let mut text = content;
                text.push_str(&format!(" [{disaster_type}/{severity}] tips: {}", tips.join("; ")));
                self.deliver_alert(&sender_region, &text, None, true);
                None
            }
            Message::Request { sender_port, ts, .. } => {
                self.mutex_engine
                    .on_request(&self.local, &self.peers, &self.clock, self.timeout, sender_port, ts)
                    .await;
                None
            }
            Message::Reply { sender_port, .. } => {
                self.mutex_engine.on_reply(sender_port);
                None
            }
            Message::Release { sender_port, .. } => {
                tracing::debug!(sender_port, "advisory release observed");
                None
            }
            Message::Prepare { sender_port, sender_region, transaction_id, writes, .. } => {
                let yes = self.participant.handle_prepare(&transaction_id, &writes);
                let ts = self.clock.tick();
                Some(vote_response(&self.local, yes, transaction_id, ts, sender_port, &sender_region))
            }
            Message::Commit { transaction_id, .. } => {
                self.participant.handle_commit(&transaction_id);
                Some(ack(&self.local, self.clock.tick(), transaction_id))
            }
            Message::Abort { transaction_id, .. } => {
                self.participant.handle_abort(&transaction_id);
                Some(ack(&self.local, self.clock.tick(), transaction_id))
            }
            Message::VoteYes { .. } | Message::VoteNo { .. } | Message::Ack { .. } => {
                // These arrive only as direct `send_and_read` responses on
                // the coordinator's own outbound connections, never as a
                // freshly-accepted inbound connection. If one does, there
                // is nothing to route it to.
                None
            }
            Message::Error { content, .. } => {
                tracing::warn!(content, "peer reported an error");
                None
            }
        }
    }

    fn deliver_alert(&self, sender_region: &str, content: &str, target_regions: Option<&[String]>, national: bool) {
        if !region::is_relevant(&self.local.region, national, target_regions) {
            tracing::debug!(sender_region, "alert dropped by region filter");
            return;
        }
        tracing::info!(sender_region, content, national, "alert delivered");
        self.event_log.record(self.clock.read(), &format!("ALERT from {sender_region}: {content}"));
    }
}

fn vote_response(
    local: &LocalIdentity,
    yes: bool,
    transaction_id: crate::message::TxId,
    ts: u64,
    _to_port: u16,
    _to_region: &str,
) -> Message {
    if yes {
        Message::VoteYes { sender_port: local.port, sender_region: local.region.clone(), ts, transaction_id }
    } else {
        Message::VoteNo { sender_port: local.port, sender_region: local.region.clone(), ts, transaction_id }
    }
}

fn ack(local: &LocalIdentity, ts: u64, transaction_id: crate::message::TxId) -> Message {
    Message::Ack { sender_port: local.port, sender_region: local.region.clone(), ts, transaction_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn dispatcher(port: u16, region: &str) -> Dispatcher {
        let cfg = RuntimeConfig::default();
        Dispatcher {
            local: LocalIdentity::new(port, region),
            peers: Vec::new(),
            clock: Arc::new(LamportClock::new()),
            mutex_engine: Arc::new(MutexEngine::new()),
            participant: Arc::new(Participant::new()),
            event_log: Arc::new(EventLog::disabled()),
            timeout: cfg.transport_timeout,
        }
    }

    #[tokio::test]
    async fn prepare_is_answered_with_vote_yes() {
        let d = dispatcher(7001, "CHICAGO");
        let mut writes = crate::message::WriteSet::new();
        writes.insert("k".into(), "1".into());
        let msg = Message::Prepare {
            sender_port: 7000,
            sender_region: "NEW YORK".into(),
            ts: 1,
            transaction_id: "tx-a".into(),
            writes,
        };
        let response = d.route(msg).await.unwrap();
        assert_eq!(response.kind_str(), "VOTE_YES");
    }

    #[tokio::test]
    async fn off_region_alert_is_dropped_but_clock_still_advances() {
        let d = dispatcher(7001, "LOS ANGELES");
        let before = d.clock.read();
        d.clock.observe(9);
        let msg = Message::Disaster {
            sender_port: 7000,
            sender_region: "NEW YORK".into(),
            ts: 9,
            content: "flooding".into(),
            target_regions: Some(vec!["CHICAGO".into(), "HOUSTON".into()]),
            disaster_type: "Flood".into(),
            severity: "high".into(),
            tips: vec!["move to higher ground".into()],
        };
        assert!(d.route(msg).await.is_none());
        assert!(d.clock.read() > before);
    }

    #[tokio::test]
    async fn unknown_kind_gets_an_error_response_on_the_same_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let d = dispatcher(addr.port(), "CHICAGO");

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            d.handle_connection(stream, peer).await;
        });

        let raw = serde_json::json!({
            "kind": "PING",
            "sender_port": 7000,
            "sender_region": "NEW YORK",
            "lamport_time": 9,
        });
        let mut conn = tokio::net::TcpStream::connect(addr).await.unwrap();
        conn.write_all(raw.to_string().as_bytes()).await.unwrap();
        conn.shutdown().await.unwrap();
        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).await.unwrap();
        let reply: Message = serde_json::from_slice(&buf).unwrap();
        assert_eq!(reply.kind_str(), "ERROR");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn full_connection_round_trip_answers_prepare() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let d = dispatcher(addr.port(), "CHICAGO");

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            d.handle_connection(stream, peer).await;
        });

        let mut writes = crate::message::WriteSet::new();
        writes.insert("k".into(), "1".into());
        let prepare = Message::Prepare {
            sender_port: 7000,
            sender_region: "NEW YORK".into(),
            ts: 1,
            transaction_id: "tx-a".into(),
            writes,
        };
        let reply = transport::send_and_read(&addr.ip().to_string(), addr.port(), &prepare, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.kind_str(), "VOTE_YES");
        server.await.unwrap();
    }
}
