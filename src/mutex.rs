//! Ricart-Agrawala distributed mutual exclusion, §4.3.
//!
//! State lives behind a single lock; `acquire` parks on a `Notify` instead
//! of polling, woken by every `on_reply` and by `release`'s own bookkeeping.

use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::clock::LamportClock;
use crate::config::{LocalIdentity, PeerAddr};
use crate::message::Message;
use crate::transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    Idle,
    Requesting,
    InCs,
}

#[derive(Debug, Default)]
struct Inner {
    requesting: bool,
    in_cs: bool,
    my_request_ts: u64,
    replies_outstanding: usize,
    /// Insertion-ordered: peers are replied to in the order their REQUEST
    /// arrived while we held priority over them.
    deferred: Vec<u16>,
}

pub struct MutexEngine {
    state: Mutex<Inner>,
    notify: Notify,
}

impl Default for MutexEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn state(&self) -> MutexState {
        let s = self.state.lock();
        if s.in_cs {
            MutexState::InCs
        } else if s.requesting {
            MutexState::Requesting
        } else {
            MutexState::Idle
        }
    }

    /// Request and block until every other peer has replied, then enter the
    /// critical section. Precondition: idle. Postcondition: `in_cs`.
    pub async fn acquire(
        &self,
        local: &LocalIdentity,
        peers: &[PeerAddr],
        clock: &LamportClock,
        timeout: Duration,
    ) {
        let ts = {
            let mut s = self.state.lock();
            debug_assert!(!s.requesting && !s.in_cs, "acquire called while not idle");
            let ts = clock.tick();
            s.requesting = true;
            s.my_request_ts = ts;
            s.replies_outstanding = peers.len();
            ts
        };

        tracing::debug!(ts, "requesting critical section");

        let request = Message::Request {
            sender_port: local.port,
            sender_region: local.region.clone(),
            ts,
        };
        broadcast_one_way(peers, &request, timeout).await;

        loop {
            if peers.is_empty() {
                break;
            }
            let notified = self.notify.notified();
            if self.state.lock().replies_outstanding == 0 {
                break;
            }
            notified.await;
        }

        let mut s = self.state.lock();
        s.requesting = false;
        s.in_cs = true;
        tracing::info!(ts = s.my_request_ts, "entered critical section");
    }

    /// Leave the critical section: flush deferred replies, then broadcast
    /// an advisory RELEASE. Precondition: `in_cs`.
    pub async fn release(
        &self,
        local: &LocalIdentity,
        peers: &[PeerAddr],
        clock: &LamportClock,
        timeout: Duration,
    ) {
        let deferred = {
            let mut s = self.state.lock();
            debug_assert!(s.in_cs, "release called while not in critical section");
            s.in_cs = false;
            std::mem::take(&mut s.deferred)
        };

        tracing::info!("released critical section");

        for port in deferred {
            if let Some(peer) = peers.iter().find(|p| p.port == port) {
                let reply = Message::Reply {
                    sender_port: local.port,
                    sender_region: local.region.clone(),
                    ts: clock.tick(),
                };
                transport::send_one_way(&peer.host, peer.port, &reply, timeout).await;
            }
        }

        let release = Message::Release {
            sender_port: local.port,
            sender_region: local.region.clone(),
            ts: clock.tick(),
        };
        broadcast_one_way(peers, &release, timeout).await;
    }

    /// Dispatcher callback for an inbound REQUEST. Either defers (recording
    /// the requester) or replies immediately on a fresh connection.
    pub async fn on_request(
        &self,
        local: &LocalIdentity,
        peers: &[PeerAddr],
        clock: &LamportClock,
        timeout: Duration,
        from_port: u16,
        from_ts: u64,
    ) {
        let should_defer = {
            let mut s = self.state.lock();
            let defer = s.in_cs
                || (s.requesting && (s.my_request_ts, local.port) < (from_ts, from_port));
            if defer {
                s.deferred.push(from_port);
            }
            defer
        };

        if should_defer {
            tracing::debug!(from_port, from_ts, "deferring reply");
            return;
        }

        if let Some(peer) = peers.iter().find(|p| p.port == from_port) {
            let reply = Message::Reply {
                sender_port: local.port,
                sender_region: local.region.clone(),
                ts: clock.tick(),
            };
            transport::send_one_way(&peer.host, peer.port, &reply, timeout).await;
        }
    }

    /// Dispatcher callback for an inbound REPLY.
    pub fn on_reply(&self, from_port: u16) {
        let mut s = self.state.lock();
        if s.replies_outstanding > 0 {
            s.replies_outstanding -= 1;
        }
        tracing::debug!(from_port, remaining = s.replies_outstanding, "received reply");
        drop(s);
        self.notify.notify_waiters();
    }
}

/// Dial every peer concurrently rather than one at a time, so a REQUEST
/// broadcast doesn't serialize N connect-timeouts before `acquire` starts
/// waiting for replies.
async fn broadcast_one_way(peers: &[PeerAddr], msg: &Message, timeout: Duration) {
    let mut sends: FuturesUnordered<_> = peers
        .iter()
        .map(|peer| transport::send_one_way(&peer.host, peer.port, msg, timeout))
        .collect();
    while sends.next().await.is_some() {}
}
