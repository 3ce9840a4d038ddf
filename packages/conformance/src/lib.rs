//! Shared helpers for the svcompose conformance suite.
//!
//! [`Overlay`] wraps a [`LocalNetwork`] whose peers all report to one
//! [`RecordingListener`], so tests can place services, start searches and
//! inspect what every search owner heard.

use std::sync::Arc;
use std::time::Duration;

use svcompose::{BasicTaxonomy, PeerId, SearchId, Service};
use svcompose_node::{
    CompositionPeer, LocalNetwork, NetworkBuilder, NodeConfig, NodeError, RecordingListener,
    SearchMode,
};

/// Upper bound on how long a test waits for the network to go quiet.
pub const SETTLE: Duration = Duration::from_secs(10);

/// A flat taxonomy: every concept sits directly below `Thing`.
pub fn flat_taxonomy<'a>(concepts: impl IntoIterator<Item = &'a str>) -> BasicTaxonomy {
    let mut taxonomy = BasicTaxonomy::new("Thing");
    for concept in concepts {
        // Duplicates are harmless here.
        let _ = taxonomy.add(concept, "Thing");
    }
    taxonomy
}

/// `name` hosted on `peer`.
pub fn service(name: &str, peer: &str, inputs: &[&str], outputs: &[&str]) -> Service {
    Service::new(name, PeerId::from(peer))
        .with_inputs(inputs.iter().copied())
        .with_outputs(outputs.iter().copied())
}

pub struct Overlay {
    pub network: LocalNetwork,
    pub listener: Arc<RecordingListener>,
}

impl Overlay {
    /// Peers `p1..=pn` in a line, every peer running `mode`.
    pub fn line(n: usize, mode: SearchMode, taxonomy: BasicTaxonomy) -> Self {
        Self::build(n, mode, taxonomy, |b| b)
    }

    /// Like [`line`](Self::line), with extra builder settings applied.
    pub fn build(
        n: usize,
        mode: SearchMode,
        taxonomy: BasicTaxonomy,
        configure: impl FnOnce(NetworkBuilder) -> NetworkBuilder,
    ) -> Self {
        Self::with_configs(
            (1..=n).map(|i| NodeConfig::for_peer(format!("p{i}")).with_mode(mode)),
            taxonomy,
            configure,
        )
    }

    /// Peers from explicit configs, linked in the given order.
    pub fn with_configs(
        configs: impl IntoIterator<Item = NodeConfig>,
        taxonomy: BasicTaxonomy,
        configure: impl FnOnce(NetworkBuilder) -> NetworkBuilder,
    ) -> Self {
        let listener = Arc::new(RecordingListener::new());
        let mut builder = LocalNetwork::builder(Arc::new(taxonomy)).listener(listener.clone());
        let mut previous: Option<PeerId> = None;
        for config in configs {
            let id = config.peer_id.clone();
            builder = builder.peer(config);
            if let Some(prev) = previous.replace(id.clone()) {
                builder = builder.link(prev.as_str(), id.as_str());
            }
        }
        Self {
            network: configure(builder).build(),
            listener,
        }
    }

    /// The peer named `id`.
    ///
    /// # Panics
    ///
    /// Panics if the overlay has no such peer.
    pub fn peer(&self, id: &str) -> &Arc<CompositionPeer> {
        self.network
            .peer(id)
            .unwrap_or_else(|| panic!("no peer {id}"))
    }

    /// Register `services` on their peers and wait for the graph to settle.
    pub async fn host(&self, services: &[Service]) -> Result<(), NodeError> {
        for s in services {
            self.peer(s.peer.as_str())
                .manage_local_services(std::slice::from_ref(s), &[])?;
        }
        self.settle().await;
        Ok(())
    }

    pub async fn withdraw(&self, services: &[Service]) -> Result<(), NodeError> {
        for s in services {
            self.peer(s.peer.as_str())
                .manage_local_services(&[], std::slice::from_ref(s))?;
        }
        self.settle().await;
        Ok(())
    }

    /// Start a search for `target` on its peer and wait for it to settle.
    pub async fn search(&self, target: &Service) -> Result<SearchId, NodeError> {
        let search = self.peer(target.peer.as_str()).start_composition(target)?;
        self.settle().await;
        Ok(search)
    }

    /// Wait until no frame is in flight.
    ///
    /// # Panics
    ///
    /// Panics if the network is still busy after [`SETTLE`].
    pub async fn settle(&self) {
        assert!(self.network.settle(SETTLE).await, "network did not settle");
    }

    /// Compositions found for `search`, INIT and GOAL stripped.
    pub fn found(&self, search: &SearchId) -> Vec<Vec<String>> {
        self.listener
            .found(search)
            .into_iter()
            .map(|(composition, _)| {
                composition
                    .iter()
                    .filter(|s| {
                        !svcompose::composition::is_init(s) && !svcompose::composition::is_goal(s)
                    })
                    .map(Service::key)
                    .collect()
            })
            .collect()
    }
}
