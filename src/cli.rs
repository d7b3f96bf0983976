//! Startup flags and the interactive command loop, §4.9.
//!
//! `Args` is the `clap`-derived entrypoint surface; environment variables
//! `SENTINEL_MESH_PORT`, `SENTINEL_MESH_REGION`, and `SENTINEL_MESH_LOG_DIR`
//! override their respective flags when the flag is left at its default.

use std::io::{self, BufRead, Write as _};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::alert::CATALOGUE;
use crate::config::{LocalIdentity, PeerAddr, RuntimeConfig};
use crate::peer::Peer;

#[derive(Debug, Parser)]
#[command(name = "sentinel-mesh", about = "Region-tagged alert dissemination over Ricart-Agrawala and 2PC")]
pub struct Args {
    /// Local listening port.
    #[arg(long, default_value_t = 6001)]
    pub port: u16,

    /// Local region tag (one of the predefined cities, or any freeform tag).
    #[arg(long, default_value = "NEW YORK")]
    pub region: String,

    /// Peer entries as `host:port:region`, repeatable.
    #[arg(long = "peer", value_name = "HOST:PORT:REGION")]
    pub peers: Vec<String>,

    /// Directory the per-peer event log is written into.
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,

    /// Transport connect/read timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl Args {
    pub fn resolve(mut self) -> Result<(LocalIdentity, Vec<PeerAddr>, RuntimeConfig), crate::error::MeshError> {
        if let Ok(v) = std::env::var("SENTINEL_MESH_PORT") {
            if let Ok(p) = v.parse() {
                self.port = p;
            }
        }
        if let Ok(v) = std::env::var("SENTINEL_MESH_REGION") {
            self.region = v;
        }
        if let Ok(v) = std::env::var("SENTINEL_MESH_LOG_DIR") {
            self.log_dir = Some(v.into());
        }

        let local = LocalIdentity::new(self.port, &self.region);
        let peers = self
            .peers
            .iter()
            .map(|entry| PeerAddr::parse(entry))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = RuntimeConfig::default();
        if let Some(dir) = self.log_dir {
            config.log_dir = dir;
        }
        if let Some(secs) = self.timeout_secs {
            config.transport_timeout = Duration::from_secs(secs);
        }
        Ok((local, peers, config))
    }
}

const MENU: &str = "\n\
1) broadcast alert\n\
2) trigger disaster\n\
3) toggle background emitter\n\
4) acquire critical section\n\
5) release critical section\n\
6) begin 2PC transaction\n\
7) print state\n\
8) quit\n\
> ";

pub async fn run_interactive(peer: Arc<Peer>) -> io::Result<()> {
    let stdin = io::stdin();
    loop {
        print!("{MENU}");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        match line.trim() {
            "1" => {
                let content = prompt(&stdin, "content: ")?;
                peer.broadcast_alert(content, None).await;
            }
            "2" => {
                let Some(kind) = CATALOGUE.first() else { continue };
                println!("triggering {}", kind.name);
                let msg = match kind.scope {
                    crate::alert::Scope::National => {
                        crate::alert::compose_national(&peer.local, &peer.clock, kind)
                    }
                    crate::alert::Scope::Regional => crate::alert::compose_regional(
                        &peer.local,
                        &peer.clock,
                        kind,
                        kind.severities[0],
                        vec![peer.local.region.clone()],
                    ),
                };
                for p in &peer.peers {
                    crate::transport::send_one_way(&p.host, p.port, &msg, peer.config.transport_timeout).await;
                }
            }
            "3" => {
                let now = !peer.emitter.is_enabled();
                peer.emitter.set_enabled(now);
                println!("emitter enabled = {now}");
            }
            "4" => peer.acquire_cs().await,
            "5" => peer.release_cs().await,
            "6" => {
                let txid = uuid::Uuid::new_v4().to_string();
                let key = prompt(&stdin, "key: ")?;
                let value = prompt(&stdin, "value: ")?;
                let mut writes = crate::message::WriteSet::new();
                writes.insert(key, value);
                let committed = peer.begin_transaction(txid, writes).await;
                println!("transaction committed = {committed}");
            }
            "7" => print_state(&peer),
            "8" | "q" | "quit" => return Ok(()),
            other => println!("unrecognized choice: {other:?}"),
        }
    }
}

fn prompt(stdin: &io::Stdin, label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_state(peer: &Peer) {
    println!("clock = {}", peer.clock.read());
    println!("mutex state = {:?}", peer.mutex_engine.state());
    println!("emitter enabled = {}", peer.emitter.is_enabled());
    println!("participant locks held = {}", peer.participant.held_lock_count());
}
