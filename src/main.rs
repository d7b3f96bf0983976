use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use sentinel_mesh::cli::{run_interactive, Args};
use sentinel_mesh::peer::Peer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let args = Args::parse();
    let (local, peers, config) = match args.resolve() {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(port = local.port, region = %local.region, peer_count = peers.len(), "starting peer");

    let peer = match Peer::new(local, peers, config) {
        Ok(peer) => Arc::new(peer),
        Err(err) => {
            eprintln!("failed to open event log: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = peer.spawn_listener().await {
        eprintln!("failed to bind listener: {err}");
        std::process::exit(1);
    }
    peer.spawn_emitter();

    if let Err(err) = run_interactive(peer).await {
        eprintln!("cli error: {err}");
        std::process::exit(1);
    }
}
