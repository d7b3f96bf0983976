//! Two-phase commit over pessimistic per-key locking, §4.4.
//!
//! `Coordinator` drives a transaction from `begin` to decision. `Participant`
//! holds the lock table and staged writes behind one joint mutex, because the
//! invariant `txid ∈ staged ⇔ ∃k. lock_table[k] = txid` only holds if both
//! tables move together.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::timeout;

use crate::clock::LamportClock;
use crate::config::{LocalIdentity, PeerAddr};
use crate::message::{Message, TxId, WriteSet};
use crate::transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Preparing,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
struct TxRecord {
    writes: WriteSet,
    votes: HashMap<u16, bool>,
    state: TxState,
}

/// Coordinator role: one `Coordinator` can drive any number of transactions
/// concurrently, each keyed by its transaction id.
#[derive(Default)]
pub struct Coordinator {
    transactions: DashMap<TxId, TxRecord>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_of(&self, txid: &str) -> Option<TxState> {
        self.transactions.get(txid).map(|r| r.state)
    }

    /// Drive `txid` through prepare and decision. Returns true iff committed.
    pub async fn begin(
        &self,
        local: &LocalIdentity,
        peers: &[PeerAddr],
        clock: &LamportClock,
        connect_timeout: Duration,
        vote_deadline: Duration,
        txid: TxId,
        writes: WriteSet,
    ) -> bool {
        self.transactions.insert(
            txid.clone(),
            TxRecord { writes: writes.clone(), votes: HashMap::new(), state: TxState::Preparing },
        );

        let prepare = Message::Prepare {
            sender_port: local.port,
            sender_region: local.region.clone(),
            ts: clock.tick(),
            transaction_id: txid.clone(),
            writes: writes.clone(),
        };

        let gather = async {
            let mut votes = HashMap::new();
            let mut handles = Vec::new();
            for peer in peers {
                let prepare = prepare.clone();
                let host = peer.host.clone();
                let port = peer.port;
                handles.push(tokio::spawn(async move {
                    let reply = transport::send_and_read(&host, port, &prepare, connect_timeout).await;
                    (port, reply)
                }));
            }
            for handle in handles {
                if let Ok((port, reply)) = handle.await {
                    let yes = matches!(reply, Ok(Message::VoteYes { .. }));
                    votes.insert(port, yes);
                }
            }
            votes
        };

        let votes = timeout(vote_deadline, gather).await.unwrap_or_default();

        // Any participant that never voted (unreachable, slow, timed out) is
        // an implicit no, per §4.4 step 3.
        let all_yes = peers.iter().all(|p| votes.get(&p.port) == Some(&true));
        let decision_state = if all_yes { TxState::Committed } else { TxState::Aborted };

        if let Some(mut record) = self.transactions.get_mut(&txid) {
            record.votes = votes;
            record.state = decision_state;
        }

        tracing::info!(%txid, committed = all_yes, "2PC decision reached");

        let decision = if all_yes {
            Message::Commit {
                sender_port: local.port,
                sender_region: local.region.clone(),
                ts: clock.tick(),
                transaction_id: txid.clone(),
            }
        } else {
            Message::Abort {
                sender_port: local.port,
                sender_region: local.region.clone(),
                ts: clock.tick(),
                transaction_id: txid.clone(),
            }
        };

        // Decision goes to every participant unconditionally (§4.4 step 5),
        // even one that voted no or never answered prepare. Dialed
        // concurrently and the ACK read back on a best-effort basis: losing
        // one doesn't change the outcome, only the §4.6 ACK routing row.
        let mut acks: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| {
                let decision = decision.clone();
                async move {
                    let _ = transport::send_and_read(&peer.host, peer.port, &decision, connect_timeout).await;
                }
            })
            .collect();
        while acks.next().await.is_some() {}

        // Decision sent and acks accounted: the record has served its
        // purpose, per the transaction lifecycle in §3.
        self.transactions.remove(&txid);

        all_yes
    }
}

#[derive(Debug, Default)]
struct ParticipantState {
    lock_table: HashMap<String, TxId>,
    staged: HashMap<TxId, WriteSet>,
}

/// Participant role: the lock table, staged writes, and committed store for
/// one peer acting as a 2PC participant.
pub struct Participant {
    state: Mutex<ParticipantState>,
    store: DashMap<String, String>,
}

impl Default for Participant {
    fn default() -> Self {
        Self::new()
    }
}

impl Participant {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ParticipantState::default()),
            store: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key).map(|v| v.clone())
    }

    pub fn held_lock_count(&self) -> usize {
        self.state.lock().lock_table.len()
    }

    /// Inbound PREPARE. Votes no if any key is already locked by a different
    /// transaction; otherwise stages the writes and locks every key.
    pub fn handle_prepare(&self, txid: &TxId, writes: &WriteSet) -> bool {
        let mut s = self.state.lock();

        if let Some(existing) = s.staged.get(txid) {
            // Re-preparing the same txid with the same writes is a no-op
            // vote-yes, per the idempotence note in §4.4.
            return existing == writes;
        }

        let conflicts = writes
            .keys()
            .any(|k| s.lock_table.get(k).is_some_and(|holder| holder != txid));
        if conflicts {
            tracing::debug!(%txid, "vote no: lock conflict");
            return false;
        }

        for key in writes.keys() {
            s.lock_table.insert(key.clone(), txid.clone());
        }
        s.staged.insert(txid.clone(), writes.clone());
        true
    }

    /// Inbound COMMIT. Idempotent: a second delivery after the staged entry
    /// is gone is a no-op that still returns true (ACK).
    pub fn handle_commit(&self, txid: &TxId) -> bool {
        let mut s = self.state.lock();
        let Some(writes) = s.staged.remove(txid) else {
            tracing::debug!(%txid, "commit for unknown transaction, acking anyway");
            return true;
        };
        s.lock_table.retain(|_, holder| holder != txid);
        drop(s);
        for (key, value) in writes {
            self.store.insert(key, value);
        }
        true
    }

    /// Inbound ABORT. Idempotent, same shape as `handle_commit` without
    /// applying the writes.
    pub fn handle_abort(&self, txid: &TxId) -> bool {
        let mut s = self.state.lock();
        if s.staged.remove(txid).is_none() {
            tracing::debug!(%txid, "abort for unknown transaction, acking anyway");
        }
        s.lock_table.retain(|_, holder| holder != txid);
        true
    }
}
