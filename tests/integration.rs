//! End-to-end scenarios over real loopback TCP peers, exercising the full
//! `Peer` wiring rather than individual engines in isolation.

use std::sync::Arc;
use std::time::Duration;

use sentinel_mesh::config::{LocalIdentity, PeerAddr, RuntimeConfig};
use sentinel_mesh::message::WriteSet;
use sentinel_mesh::mutex::MutexState;
use sentinel_mesh::peer::Peer;

fn test_config(log_dir: &std::path::Path) -> RuntimeConfig {
    RuntimeConfig {
        transport_timeout: Duration::from_millis(500),
        vote_deadline: Duration::from_millis(800),
        log_dir: log_dir.to_path_buf(),
    }
}

async fn spawn_peer(port: u16, region: &str, peers: Vec<PeerAddr>, log_dir: &std::path::Path) -> Arc<Peer> {
    let local = LocalIdentity::new(port, region);
    let peer = Arc::new(Peer::new(local, peers, test_config(log_dir)).unwrap());
    peer.spawn_listener().await.unwrap();
    peer
}

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("sentinel-mesh-it-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Scenario 1: three peers, one acquires and releases with nobody else
/// requesting; the other two never accumulate deferred requesters.
#[tokio::test]
async fn three_peers_uncontended_acquire_release() {
    let dir = scratch_dir("scenario1");

    let b_addr = PeerAddr { host: "127.0.0.1".into(), port: 19002, region: "CHICAGO".into() };
    let c_addr = PeerAddr { host: "127.0.0.1".into(), port: 19003, region: "HOUSTON".into() };

    let a = Arc::new(
        Peer::new(LocalIdentity::new(19001, "NEW YORK"), vec![b_addr, c_addr], test_config(&dir)).unwrap(),
    );
    a.spawn_listener().await.unwrap();
    let b = spawn_peer(19002, "CHICAGO", vec![], &dir).await;
    let c = spawn_peer(19003, "HOUSTON", vec![], &dir).await;

    a.acquire_cs().await;
    assert_eq!(a.mutex_engine.state(), MutexState::InCs);

    a.release_cs().await;
    assert_eq!(a.mutex_engine.state(), MutexState::Idle);
    assert_eq!(b.mutex_engine.state(), MutexState::Idle);
    assert_eq!(c.mutex_engine.state(), MutexState::Idle);
}

/// Scenario 2: two peers request concurrently from a cold clock; both
/// requests carry ts=1, so the lower port wins the tie-break and enters its
/// critical section first.
#[tokio::test]
async fn concurrent_requests_break_ties_by_port() {
    let dir = scratch_dir("scenario2");

    let a_addr = PeerAddr { host: "127.0.0.1".into(), port: 19011, region: "NEW YORK".into() };
    let b_addr = PeerAddr { host: "127.0.0.1".into(), port: 19012, region: "CHICAGO".into() };

    let a = Arc::new(
        Peer::new(LocalIdentity::new(19011, "NEW YORK"), vec![b_addr.clone()], test_config(&dir)).unwrap(),
    );
    let b = Arc::new(
        Peer::new(LocalIdentity::new(19012, "CHICAGO"), vec![a_addr], test_config(&dir)).unwrap(),
    );
    a.spawn_listener().await.unwrap();
    b.spawn_listener().await.unwrap();

    let a_task = {
        let a = a.clone();
        tokio::spawn(async move { a.acquire_cs().await })
    };
    let b_task = {
        let b = b.clone();
        tokio::spawn(async move { b.acquire_cs().await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(a.mutex_engine.state(), MutexState::InCs, "lower port should win the tie-break");
    assert_eq!(b.mutex_engine.state(), MutexState::Requesting);

    a.release_cs().await;
    a_task.await.unwrap();
    b_task.await.unwrap();
    assert_eq!(b.mutex_engine.state(), MutexState::InCs);
}

/// Scenario 3: both participants idle, transaction commits on both.
#[tokio::test]
async fn two_phase_commit_succeeds_when_both_idle() {
    let dir = scratch_dir("scenario3");

    let p1_addr = PeerAddr { host: "127.0.0.1".into(), port: 19022, region: "CHICAGO".into() };
    let p2_addr = PeerAddr { host: "127.0.0.1".into(), port: 19023, region: "HOUSTON".into() };

    let p1 = spawn_peer(19022, "CHICAGO", vec![], &dir).await;
    let p2 = spawn_peer(19023, "HOUSTON", vec![], &dir).await;
    let coordinator = Arc::new(
        Peer::new(
            LocalIdentity::new(19021, "NEW YORK"),
            vec![p1_addr, p2_addr],
            test_config(&dir),
        )
        .unwrap(),
    );
    coordinator.spawn_listener().await.unwrap();

    let mut writes = WriteSet::new();
    writes.insert("alert_count".into(), "5".into());
    let committed = coordinator.begin_transaction("tx-a".into(), writes).await;

    assert!(committed);
    // Destroyed once the decision is sent and acks are accounted (§3).
    assert_eq!(coordinator.coordinator.state_of("tx-a"), None);
    assert_eq!(p1.participant.get("alert_count"), Some("5".into()));
    assert_eq!(p2.participant.get("alert_count"), Some("5".into()));
    assert_eq!(p1.participant.held_lock_count(), 0);
    assert_eq!(p2.participant.held_lock_count(), 0);
}

/// Scenario 4: one participant already holds a conflicting lock, so the
/// whole transaction aborts and neither store is updated.
#[tokio::test]
async fn two_phase_commit_aborts_on_lock_conflict() {
    let dir = scratch_dir("scenario4");

    let p1_addr = PeerAddr { host: "127.0.0.1".into(), port: 19032, region: "CHICAGO".into() };
    let p2_addr = PeerAddr { host: "127.0.0.1".into(), port: 19033, region: "HOUSTON".into() };

    let p1 = spawn_peer(19032, "CHICAGO", vec![], &dir).await;
    let p2 = spawn_peer(19033, "HOUSTON", vec![], &dir).await;
    let coordinator = Arc::new(
        Peer::new(
            LocalIdentity::new(19031, "NEW YORK"),
            vec![p1_addr, p2_addr],
            test_config(&dir),
        )
        .unwrap(),
    );
    coordinator.spawn_listener().await.unwrap();

    // A prior transaction locks `alert_count` at p1 and is never resolved.
    let mut prior = WriteSet::new();
    prior.insert("alert_count".into(), "1".into());
    assert!(p1.participant.handle_prepare(&"tx-prior".to_string(), &prior));

    let mut writes = WriteSet::new();
    writes.insert("alert_count".into(), "5".into());
    let committed = coordinator.begin_transaction("tx-a".into(), writes).await;

    assert!(!committed);
    assert_eq!(coordinator.coordinator.state_of("tx-a"), None);
    assert_eq!(p1.participant.get("alert_count"), None);
    assert_eq!(p2.participant.get("alert_count"), None);
    // tx-a's staged entry at p2 is cleared by the abort; p1's lock remains
    // held by tx-prior, which never received a decision.
    assert_eq!(p1.participant.held_lock_count(), 1);
    assert_eq!(p2.participant.held_lock_count(), 0);
}
