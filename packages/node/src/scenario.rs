//! JSON scenarios run on a [`LocalNetwork`].
//!
//! A scenario names a taxonomy, a set of peers and links, the services each
//! peer hosts and the searches to start. It runs in three phases, waiting
//! for the network to settle after each one:
//!
//! 1. services are registered and the graph is built;
//! 2. searches are started;
//! 3. removals (services, then peers) are applied.
//!
//! ```json
//! {
//!   "taxonomy": { "root": "Thing", "parents": { "A": "Thing", "B": "Thing" } },
//!   "mode": "forward",
//!   "peers": ["p1", "p2"],
//!   "links": [["p1", "p2"]],
//!   "services": [{ "name": "AB", "peer": "p2", "inputs": ["A"], "outputs": ["B"] }],
//!   "searches": [{ "name": "T", "peer": "p1", "inputs": ["A"], "outputs": ["B"] }]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use svcompose::{validate_service, BasicTaxonomy, PeerId, SearchId, Service, TaxonomyDocument};
use tracing::{info, warn};

use crate::config::{NodeConfig, SearchMode};
use crate::error::NodeError;
use crate::listener::{CompositionEvent, RecordingListener};
use crate::network::LocalNetwork;

fn default_settle_ms() -> u64 {
    5_000
}

/// A service as written in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub peer: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl ServiceSpec {
    pub fn to_service(&self) -> Result<Service, NodeError> {
        let service = Service::new(&self.name, PeerId::new(&self.peer))
            .with_inputs(self.inputs.iter().map(String::as_str))
            .with_outputs(self.outputs.iter().map(String::as_str));
        validate_service(&service)?;
        Ok(service)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub taxonomy: TaxonomyDocument,
    #[serde(default = "default_mode")]
    pub mode: SearchMode,
    #[serde(default)]
    pub max_ttl: Option<u32>,
    #[serde(default)]
    pub expiration_ms: Option<u64>,
    #[serde(default)]
    pub multiple_paths: bool,
    /// Peers further away than this are only reachable through relays.
    #[serde(default)]
    pub route_horizon: Option<u32>,
    pub peers: Vec<String>,
    #[serde(default)]
    pub links: Vec<(String, String)>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    /// Targets to search for, started by the peer named in each entry.
    #[serde(default)]
    pub searches: Vec<ServiceSpec>,
    /// `name` of services to withdraw once searches have settled.
    #[serde(default)]
    pub remove_services: Vec<String>,
    #[serde(default)]
    pub remove_peers: Vec<String>,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_mode() -> SearchMode {
    SearchMode::Forward
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self, NodeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Check that every reference in the scenario resolves.
    pub fn validate(&self) -> Result<(), NodeError> {
        BasicTaxonomy::from_document(self.taxonomy.clone())?;
        let peers: BTreeSet<&str> = self.peers.iter().map(String::as_str).collect();
        if peers.len() != self.peers.len() {
            return Err(NodeError::Scenario("duplicate peer id".into()));
        }
        for (a, b) in &self.links {
            for end in [a, b] {
                if !peers.contains(end.as_str()) {
                    return Err(NodeError::Scenario(format!("link names unknown peer {end:?}")));
                }
            }
        }
        let mut names = BTreeSet::new();
        for spec in self.services.iter().chain(&self.searches) {
            if !peers.contains(spec.peer.as_str()) {
                return Err(NodeError::Scenario(format!(
                    "{} is placed on unknown peer {:?}",
                    spec.name, spec.peer
                )));
            }
            spec.to_service()?;
        }
        for spec in &self.services {
            if !names.insert(spec.name.as_str()) {
                return Err(NodeError::Scenario(format!("service {:?} is defined twice", spec.name)));
            }
        }
        for name in &self.remove_services {
            if !names.contains(name.as_str()) {
                return Err(NodeError::Scenario(format!("cannot remove unknown service {name:?}")));
            }
        }
        for peer in &self.remove_peers {
            if !peers.contains(peer.as_str()) {
                return Err(NodeError::Scenario(format!("cannot remove unknown peer {peer:?}")));
            }
        }
        Ok(())
    }

    fn config(&self, peer: &str) -> NodeConfig {
        let mut config = NodeConfig::for_peer(peer)
            .with_mode(self.mode)
            .with_multiple_paths(self.multiple_paths);
        if let Some(ttl) = self.max_ttl {
            config = config.with_max_ttl(ttl);
        }
        if let Some(ms) = self.expiration_ms {
            config = config.with_search_expiration(Duration::from_millis(ms));
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundComposition {
    /// Service keys (`name:peer`), INIT and GOAL excluded.
    pub services: Vec<String>,
    pub hops: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub search: String,
    pub target: String,
    pub peer: String,
    pub found: Vec<FoundComposition>,
    pub expired: bool,
    pub lost: bool,
    pub modified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub mode: SearchMode,
    pub searches: Vec<SearchReport>,
}

impl ScenarioReport {
    /// Total number of compositions found across all searches.
    pub fn total_found(&self) -> usize {
        self.searches.iter().map(|s| s.found.len()).sum()
    }
}

fn report(search: &SearchId, spec: &ServiceSpec, events: &[CompositionEvent]) -> SearchReport {
    let mut out = SearchReport {
        search: search.to_string(),
        target: spec.name.clone(),
        peer: spec.peer.clone(),
        found: Vec::new(),
        expired: false,
        lost: false,
        modified: false,
    };
    for event in events.iter().filter(|e| e.search() == search) {
        match event {
            CompositionEvent::Found { composition, hops, .. } => out.found.push(FoundComposition {
                services: composition
                    .iter()
                    .filter(|s| !svcompose::composition::is_init(s) && !svcompose::composition::is_goal(s))
                    .map(Service::key)
                    .collect(),
                hops: *hops,
            }),
            CompositionEvent::Expired { .. } => out.expired = true,
            CompositionEvent::Lost { .. } => out.lost = true,
            CompositionEvent::Modified { .. } => out.modified = true,
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Build the network described by `scenario`, run it and collect every
/// listener event into a report.
pub async fn run_scenario(scenario: &Scenario) -> Result<ScenarioReport, NodeError> {
    scenario.validate()?;
    let taxonomy = Arc::new(BasicTaxonomy::from_document(scenario.taxonomy.clone())?);
    let listener = Arc::new(RecordingListener::new());
    let settle = Duration::from_millis(scenario.settle_ms);

    let mut builder = LocalNetwork::builder(taxonomy).listener(listener.clone());
    for peer in &scenario.peers {
        builder = builder.peer(scenario.config(peer));
    }
    for (a, b) in &scenario.links {
        builder = builder.link(a.as_str(), b.as_str());
    }
    if let Some(hops) = scenario.route_horizon {
        builder = builder.route_horizon(hops);
    }
    let mut network = builder.build();

    let mut hosted: BTreeMap<String, Vec<Service>> = BTreeMap::new();
    for spec in &scenario.services {
        hosted.entry(spec.peer.clone()).or_default().push(spec.to_service()?);
    }
    for (peer, services) in &hosted {
        let peer = network
            .peer(peer)
            .ok_or_else(|| NodeError::Scenario(format!("unknown peer {peer:?}")))?;
        peer.manage_local_services(services, &[])?;
    }
    if !network.settle(settle).await {
        warn!("network: graph construction did not settle");
    }

    let mut started = Vec::new();
    for spec in &scenario.searches {
        let peer = network
            .peer(&spec.peer)
            .ok_or_else(|| NodeError::Scenario(format!("unknown peer {:?}", spec.peer)))?;
        let search = peer.start_composition(&spec.to_service()?)?;
        started.push((search, spec));
    }
    if !network.settle(settle).await {
        warn!("network: searches did not settle");
    }

    for name in &scenario.remove_services {
        let Some(service) = hosted.values().flatten().find(|s| &s.name == name) else {
            continue;
        };
        if let Some(peer) = network.peer(service.peer.as_str()) {
            peer.manage_local_services(&[], &[service.clone()])?;
        }
    }
    for peer in &scenario.remove_peers {
        network.remove_peer(peer).await;
    }
    if !network.settle(settle).await {
        warn!("network: removals did not settle");
    }

    let events = listener.events();
    let searches: Vec<SearchReport> = started
        .iter()
        .map(|(search, spec)| report(search, spec, &events))
        .collect();
    network.shutdown().await;

    let report = ScenarioReport {
        mode: scenario.mode,
        searches,
    };
    info!("network: scenario finished, {} compositions found", report.total_found());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"{
        "taxonomy": { "root": "Thing", "parents": { "A": "Thing", "B": "Thing", "C": "Thing" } },
        "peers": ["p1", "p2", "p3"],
        "links": [["p1", "p2"], ["p2", "p3"]],
        "services": [
            { "name": "AB", "peer": "p2", "inputs": ["A"], "outputs": ["B"] },
            { "name": "BC", "peer": "p3", "inputs": ["B"], "outputs": ["C"] }
        ],
        "searches": [{ "name": "T", "peer": "p1", "inputs": ["A"], "outputs": ["C"] }]
    }"#;

    #[test]
    fn unknown_peers_are_rejected() {
        let mut scenario = Scenario::from_json(CHAIN).unwrap();
        scenario.links.push(("p1".into(), "p9".into()));
        assert!(matches!(scenario.validate(), Err(NodeError::Scenario(_))));
    }

    #[test]
    fn duplicate_services_are_rejected() {
        let mut scenario = Scenario::from_json(CHAIN).unwrap();
        scenario.services.push(scenario.services[0].clone());
        assert!(matches!(scenario.validate(), Err(NodeError::Scenario(_))));
    }

    #[test]
    fn defaults_apply() {
        let scenario = Scenario::from_json(CHAIN).unwrap();
        assert_eq!(scenario.mode, SearchMode::Forward);
        assert_eq!(scenario.settle_ms, 5_000);
        assert!(scenario.validate().is_ok());
    }

    #[tokio::test]
    async fn chain_scenario_finds_one_composition() {
        let scenario = Scenario::from_json(CHAIN).unwrap();
        let report = run_scenario(&scenario).await.unwrap();
        assert_eq!(report.searches.len(), 1);
        let search = &report.searches[0];
        assert_eq!(search.found.len(), 1);
        assert_eq!(search.found[0].services, vec!["AB:p2".to_string(), "BC:p3".to_string()]);
        assert!(!search.lost);
    }

    #[tokio::test]
    async fn removing_a_service_reports_the_loss() {
        let mut scenario = Scenario::from_json(CHAIN).unwrap();
        scenario.remove_services.push("BC".into());
        let report = run_scenario(&scenario).await.unwrap();
        assert!(report.searches[0].lost);
    }
}
