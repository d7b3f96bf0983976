//! Top-level peer: owns every engine and the inbound acceptor loop.

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::alert::Emitter;
use crate::clock::LamportClock;
use crate::config::{LocalIdentity, PeerAddr, RuntimeConfig};
use crate::dispatcher::Dispatcher;
use crate::eventlog::EventLog;
use crate::mutex::MutexEngine;
use crate::twopc::{Coordinator, Participant};

pub struct Peer {
    pub local: LocalIdentity,
    pub peers: Vec<PeerAddr>,
    pub config: RuntimeConfig,
    pub clock: Arc<LamportClock>,
    pub mutex_engine: Arc<MutexEngine>,
    pub participant: Arc<Participant>,
    pub coordinator: Arc<Coordinator>,
    pub event_log: Arc<EventLog>,
    pub emitter: Arc<Emitter>,
}

impl Peer {
    pub fn new(local: LocalIdentity, peers: Vec<PeerAddr>, config: RuntimeConfig) -> std::io::Result<Self> {
        let event_log = EventLog::open(&config.log_dir, local.port, &local.region)?;
        Ok(Self {
            local,
            peers,
            config,
            clock: Arc::new(LamportClock::new()),
            mutex_engine: Arc::new(MutexEngine::new()),
            participant: Arc::new(Participant::new()),
            coordinator: Arc::new(Coordinator::new()),
            event_log: Arc::new(event_log),
            emitter: Arc::new(Emitter::new()),
        })
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            local: self.local.clone(),
            peers: self.peers.clone(),
            clock: self.clock.clone(),
            mutex_engine: self.mutex_engine.clone(),
            participant: self.participant.clone(),
            event_log: self.event_log.clone(),
            timeout: self.config.transport_timeout,
        }
    }

    /// Bind the inbound listener and spawn the accept loop. Returns once
    /// bound; the loop itself runs for the life of the returned handle.
    pub async fn spawn_listener(self: &Arc<Self>) -> std::io::Result<tokio::task::JoinHandle<()>> {
        let listener = TcpListener::bind(("0.0.0.0", self.local.port)).await?;
        let peer = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let dispatcher = peer.dispatcher();
                tokio::spawn(async move {
                    dispatcher.handle_connection(stream, addr).await;
                });
            }
        }))
    }

    /// Spawn the background alert emitter. A no-op until toggled on via
    /// `self.emitter.set_enabled(true)`.
    pub fn spawn_emitter(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let peer = self.clone();
        tokio::spawn(async move {
            peer.emitter
                .run(peer.local.clone(), peer.peers.clone(), peer.clock.clone(), peer.config.transport_timeout)
                .await;
        })
    }

    pub async fn acquire_cs(&self) {
        self.mutex_engine
            .acquire(&self.local, &self.peers, &self.clock, self.config.transport_timeout)
            .await;
    }

    pub async fn release_cs(&self) {
        self.mutex_engine
            .release(&self.local, &self.peers, &self.clock, self.config.transport_timeout)
            .await;
    }

    pub async fn begin_transaction(&self, txid: String, writes: crate::message::WriteSet) -> bool {
        self.coordinator
            .begin(
                &self.local,
                &self.peers,
                &self.clock,
                self.config.transport_timeout,
                self.config.vote_deadline,
                txid,
                writes,
            )
            .await
    }

    pub async fn broadcast_alert(&self, content: String, target_regions: Option<Vec<String>>) {
        let msg = crate::alert::compose_alert(&self.local, &self.clock, content, target_regions);
        for peer in &self.peers {
            crate::transport::send_one_way(&peer.host, peer.port, &msg, self.config.transport_timeout).await;
        }
    }
}
