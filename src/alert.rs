//! The disaster catalogue and alert composition, §4.7.
//!
//! `compose_regional` and `compose_national` build outbound `Message`s from
//! the catalogue; `Emitter` is the optional background task that composes
//! and broadcasts randomized disasters on a jittered interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::clock::LamportClock;
use crate::config::{LocalIdentity, PeerAddr};
use crate::message::Message;
use crate::region;
use crate::transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Regional,
    National,
}

pub struct DisasterKind {
    pub name: &'static str,
    pub scope: Scope,
    pub severities: &'static [&'static str],
    pub tips: &'static [&'static str],
}

/// Regional entries escalate from the type's own low end up to
/// `Critical`/`Extreme`; national entries always carry `NationalEmergency`.
pub const CATALOGUE: &[DisasterKind] = &[
    DisasterKind {
        name: "Earthquake",
        scope: Scope::Regional,
        severities: &["Minor", "Moderate", "Major", "Critical"],
        tips: &["Drop, cover, and hold on", "Move to {evac} once shaking stops", "Expect aftershocks"],
    },
    DisasterKind {
        name: "Tsunami",
        scope: Scope::Regional,
        severities: &["Advisory", "Watch", "Warning", "Extreme"],
        tips: &["Move inland and to higher ground immediately", "Report to {evac}"],
    },
    DisasterKind {
        name: "Flood",
        scope: Scope::Regional,
        severities: &["Minor", "Moderate", "Major", "Critical"],
        tips: &["Move to higher ground", "Avoid flooded roadways", "Shelter at {evac} if displaced"],
    },
    DisasterKind {
        name: "Wildfire",
        scope: Scope::Regional,
        severities: &["Watch", "Warning", "Critical", "Extreme"],
        tips: &["Prepare to evacuate to {evac}", "Monitor air quality"],
    },
    DisasterKind {
        name: "Tornado",
        scope: Scope::Regional,
        severities: &["Watch", "Warning", "Critical"],
        tips: &["Take shelter in an interior room", "Move to {evac} if your structure is unsafe"],
    },
    DisasterKind {
        name: "Hurricane",
        scope: Scope::Regional,
        severities: &["Category 1", "Category 2", "Category 3", "Extreme"],
        tips: &["Secure property and evacuate low-lying areas", "Report to {evac}"],
    },
    DisasterKind {
        name: "Hazmat",
        scope: Scope::Regional,
        severities: &["Advisory", "Warning", "Critical"],
        tips: &["Shelter in place with windows sealed", "Await all-clear before moving to {evac}"],
    },
    DisasterKind {
        name: "Nuclear",
        scope: Scope::National,
        severities: &["NationalEmergency"],
        tips: &["Follow federal emergency broadcast instructions", "Shelter in a reinforced structure"],
    },
    DisasterKind {
        name: "War",
        scope: Scope::National,
        severities: &["NationalEmergency"],
        tips: &["Follow civil defense instructions", "Avoid infrastructure and government facilities"],
    },
    DisasterKind {
        name: "Bioterrorism",
        scope: Scope::National,
        severities: &["NationalEmergency"],
        tips: &["Follow CDC and local health department guidance", "Avoid crowded public spaces"],
    },
];

fn resolve_tips(kind: &DisasterKind, evac: Option<&str>) -> Vec<String> {
    let placeholder = evac.unwrap_or("the nearest designated shelter");
    kind.tips.iter().map(|t| t.replace("{evac}", placeholder)).collect()
}

pub fn compose_regional(
    local: &LocalIdentity,
    clock: &LamportClock,
    kind: &DisasterKind,
    severity: &str,
    target_regions: Vec<String>,
) -> Message {
    debug_assert_eq!(kind.scope, Scope::Regional);
    Message::Disaster {
        sender_port: local.port,
        sender_region: local.region.clone(),
        ts: clock.tick(),
        content: format!("{} reported in {}", kind.name, local.region),
        target_regions: Some(target_regions),
        disaster_type: kind.name.to_string(),
        severity: severity.to_string(),
        tips: resolve_tips(kind, local.evacuation_location),
    }
}

pub fn compose_national(local: &LocalIdentity, clock: &LamportClock, kind: &DisasterKind) -> Message {
    debug_assert_eq!(kind.scope, Scope::National);
    Message::National {
        sender_port: local.port,
        sender_region: local.region.clone(),
        ts: clock.tick(),
        content: format!("{} declared, originating from {}", kind.name, local.region),
        disaster_type: kind.name.to_string(),
        severity: "NationalEmergency".to_string(),
        tips: resolve_tips(kind, local.evacuation_location),
    }
}

pub fn compose_alert(
    local: &LocalIdentity,
    clock: &LamportClock,
    content: String,
    target_regions: Option<Vec<String>>,
) -> Message {
    Message::Alert {
        sender_port: local.port,
        sender_region: local.region.clone(),
        ts: clock.tick(),
        content,
        target_regions,
    }
}

async fn broadcast(peers: &[PeerAddr], msg: &Message, timeout: Duration) {
    for peer in peers {
        transport::send_one_way(&peer.host, peer.port, msg, timeout).await;
    }
}

/// Background task that periodically composes and broadcasts a randomized
/// disaster. Enabled/disabled via the shared `AtomicBool` flag so the CLI can
/// toggle it without tearing down the task.
pub struct Emitter {
    enabled: Arc<AtomicBool>,
}

impl Emitter {
    pub fn new() -> Self {
        Self { enabled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Run forever, sleeping a random 5-15s interval between emissions and
    /// skipping quietly while disabled. Intended to be `tokio::spawn`ed once
    /// per peer for the process lifetime.
    pub async fn run(
        &self,
        local: LocalIdentity,
        peers: Vec<PeerAddr>,
        clock: Arc<LamportClock>,
        timeout: Duration,
    ) {
        let mut rng = SmallRng::from_entropy();
        loop {
            let sleep_secs = rng.gen_range(5..=15);
            tokio::time::sleep(Duration::from_secs(sleep_secs)).await;

            if !self.is_enabled() {
                continue;
            }

            let kind = weighted_pick(&mut rng);
            let msg = match kind.scope {
                Scope::National => compose_national(&local, &clock, kind),
                Scope::Regional => {
                    let severity = kind.severities.choose(&mut rng).copied().unwrap_or(kind.severities[0]);
                    let targets = pick_target_regions(&mut rng);
                    compose_regional(&local, &clock, kind, severity, targets)
                }
            };
            tracing::info!(disaster = kind.name, "background emitter broadcasting");
            broadcast(&peers, &msg, timeout).await;
        }
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

/// National disasters carry ~0.3 relative weight against regional ones.
fn weighted_pick(rng: &mut SmallRng) -> &'static DisasterKind {
    let weights: Vec<f64> = CATALOGUE
        .iter()
        .map(|k| if k.scope == Scope::National { 0.3 } else { 1.0 })
        .collect();
    let total: f64 = weights.iter().sum();
    let mut roll = rng.gen::<f64>() * total;
    for (kind, weight) in CATALOGUE.iter().zip(weights.iter()) {
        if roll < *weight {
            return kind;
        }
        roll -= weight;
    }
    CATALOGUE.last().expect("catalogue is non-empty")
}

fn pick_target_regions(rng: &mut SmallRng) -> Vec<String> {
    let mut names = region::all_region_names();
    names.shuffle(rng);
    let count = rng.gen_range(1..=3.min(names.len()));
    names.into_iter().take(count).map(|n| n.to_string()).collect()
}
