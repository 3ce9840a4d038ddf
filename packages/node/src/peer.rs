//! The per-peer composition runtime.
//!
//! [`CompositionPeer`] ties the graph creator, the three search tables and
//! the listener together. Incoming messages enter through
//! [`CompositionPeer::handle`]; graph-construction messages go to the
//! creator and the resulting [`GraphChanges`] are fed back into the running
//! searches.
//!
//! Locking: the creator and each table have their own mutex. No code path
//! holds the creator lock while taking a table lock; outgoing messages are
//! collected first and dispatched afterwards.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use svcompose::composition::{create_goal, create_init};
use svcompose::{
    validate_service, IdGenerator, PeerId, SearchId, Service, ServiceDependencyGraph, Taxonomy,
};
use svcompose_wire::Message;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::collaborators::{Dissemination, Transport};
use crate::config::NodeConfig;
use crate::creator::{CollisionGraphCreator, GraphChanges};
use crate::error::NodeError;
use crate::listener::CompositionListener;
use crate::tables::{BackwardTable, ForwardTable, LocalSearchesTable, SearchStatus};

pub struct CompositionPeer {
    pub(crate) config: NodeConfig,
    pub(crate) ids: Arc<IdGenerator>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dissemination: Arc<dyn Dissemination>,
    pub(crate) taxonomy: Arc<dyn Taxonomy>,
    pub(crate) listener: Arc<dyn CompositionListener>,
    creator: Mutex<CollisionGraphCreator>,
    pub(crate) local: LocalSearchesTable,
    pub(crate) forward: ForwardTable,
    pub(crate) backward: BackwardTable,
    /// Compositions already sent towards their owner from a meeting point.
    pub(crate) notified: Mutex<BTreeSet<(SearchId, BTreeSet<Service>)>>,
}

impl CompositionPeer {
    pub fn new(
        config: NodeConfig,
        taxonomy: Arc<dyn Taxonomy>,
        transport: Arc<dyn Transport>,
        dissemination: Arc<dyn Dissemination>,
        listener: Arc<dyn CompositionListener>,
    ) -> Self {
        let ids = Arc::new(IdGenerator::new(config.peer_id.clone()));
        let creator = CollisionGraphCreator::new(
            Arc::clone(&taxonomy),
            Arc::clone(&ids),
            Arc::clone(&transport),
            Arc::clone(&dissemination),
            config.multiple_paths,
        );
        Self {
            forward: ForwardTable::new(Arc::clone(&taxonomy)),
            backward: BackwardTable::new(),
            local: LocalSearchesTable::new(),
            notified: Mutex::new(BTreeSet::new()),
            creator: Mutex::new(creator),
            config,
            ids,
            transport,
            dissemination,
            taxonomy,
            listener,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.config.peer_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn creator(&self) -> MutexGuard<'_, CollisionGraphCreator> {
        self.creator.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` against the local service dependency graph.
    pub fn with_graph<R>(&self, f: impl FnOnce(&ServiceDependencyGraph) -> R) -> R {
        f(self.creator().sdg())
    }

    /// Send each payload towards its destination services.
    pub(crate) fn dispatch(&self, outgoing: Vec<(Message, BTreeSet<Service>)>) {
        if outgoing.is_empty() {
            return;
        }
        let creator = self.creator();
        for (message, destinations) in outgoing {
            creator.forward_message(message, &destinations);
        }
    }

    /// The members of `services` hosted here.
    pub(crate) fn local_destinations(&self, services: &BTreeSet<Service>) -> Vec<Service> {
        let creator = self.creator();
        services
            .iter()
            .filter(|s| creator.sdg().is_local(s))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Local services
    // -----------------------------------------------------------------------

    /// Remove then add local services and update the running searches.
    pub fn manage_local_services(&self, added: &[Service], removed: &[Service]) -> Result<(), NodeError> {
        for service in added {
            validate_service(service)?;
        }
        self.update_local_services(added, removed)
    }

    /// Same as [`manage_local_services`](Self::manage_local_services)
    /// without validation, so INIT and GOAL services can pass.
    fn update_local_services(&self, added: &[Service], removed: &[Service]) -> Result<(), NodeError> {
        let changes = self.creator().manage_local_services(added, removed)?;
        for service in removed {
            self.backward.forget_service(service);
        }
        self.apply_changes(changes);
        Ok(())
    }

    /// Forget every remote service reachable only through `peers`.
    pub fn lost_destinations(&self, peers: &BTreeSet<PeerId>) {
        let changes = self.creator().lost_destinations(peers);
        self.apply_changes(changes);
    }

    // -----------------------------------------------------------------------
    // Searches
    // -----------------------------------------------------------------------

    /// Inject the INIT and GOAL services of a future search for `target`.
    ///
    /// Preparing the same target twice returns the first search.
    pub fn prepare_composition(&self, target: &Service) -> Result<SearchId, NodeError> {
        validate_service(target)?;
        if let Some((_, _, search)) = self.local.prepared(target) {
            return Ok(search);
        }
        let search = self.ids.next_search_id();
        let init = create_init(target, &search);
        let goal = create_goal(target, &search);
        self.update_local_services(&[init.clone(), goal.clone()], &[])?;
        self.local.add_prepared(target, init, goal, search.clone());
        debug!("search: {search} prepared for {}", target.name);
        Ok(search)
    }

    /// Start a search for compositions providing `target`.
    pub fn start_composition(&self, target: &Service) -> Result<SearchId, NodeError> {
        validate_service(target)?;
        let (search, init, goal, was_prepared) = match self.local.prepared(target) {
            Some((init, goal, search)) => (search, init, goal, true),
            None => {
                let search = self.ids.next_search_id();
                let init = create_init(target, &search);
                let goal = create_goal(target, &search);
                (search, init, goal, false)
            }
        };

        self.local.add_search(
            search.clone(),
            init.clone(),
            goal.clone(),
            self.config.max_ttl,
            self.config.search_expiration,
            was_prepared,
        );
        if !was_prepared {
            self.update_local_services(&[init.clone(), goal.clone()], &[])?;
        }
        self.local.start_search(&search);
        info!(
            "search: {search} started for {} ({} mode, ttl {})",
            target.name, self.config.search_mode, self.config.max_ttl
        );

        if self.config.search_mode.runs_forward() {
            self.start_forward(&search, &init);
        }
        if self.config.search_mode.runs_backward() {
            self.start_backward(&search, &goal);
        }
        Ok(search)
    }

    pub fn is_running_search(&self, search: &SearchId) -> bool {
        self.local.is_running(search)
    }

    pub fn search_status(&self, search: &SearchId) -> SearchStatus {
        self.local.status(search)
    }

    pub fn remaining_time(&self, search: &SearchId) -> Duration {
        self.local.remaining_time(search)
    }

    pub fn are_all_inputs_covered(&self, search: &SearchId, service: &Service) -> bool {
        self.forward.are_all_inputs_covered(search, service)
    }

    /// Report a composition to the listener unless it was reported before.
    pub(crate) fn report_found(&self, search: &SearchId, composition: &BTreeSet<Service>, hops: u32) {
        if self.local.record_found(search, composition) {
            info!(
                "search: {search} found a composition of {} services in {hops} hops",
                composition.len()
            );
            self.listener.composition_found(search, composition, hops);
        }
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Process one message received from the network.
    pub fn handle(&self, message: Message) {
        match message {
            Message::Forward(m) => {
                let here = m.destinations.iter().any(|s| s.peer == *self.peer_id());
                self.creator().relay(&m.payload, &m.destinations);
                if here {
                    self.handle(*m.payload);
                }
            }
            Message::FComposition(m) => self.receive_forward(m),
            Message::BComposition(m) => self.receive_backward(m),
            Message::InvalidCompositions(m) => self.receive_invalid(m),
            Message::CompositionNotification(m) => {
                if let Some(arrived) = self.route_along_path(m) {
                    self.accept_notification(arrived);
                }
            }
            Message::CompositionModification(m) => {
                if let Some(arrived) = self.route_along_path(m) {
                    self.accept_modification(arrived);
                }
            }
            other => {
                let changes = self.creator().handle(other);
                self.apply_changes(changes);
            }
        }
    }

    /// Feed graph changes into the protocols this peer runs.
    pub(crate) fn apply_changes(&self, changes: GraphChanges) {
        if changes.is_empty() {
            return;
        }
        let mode = self.config.search_mode;
        if mode.runs_forward() {
            for (service, successors) in &changes.new_successors {
                self.forward_new_successors(service, successors);
            }
            for (service, lost) in &changes.lost_ancestors {
                self.forward_lost_ancestors(service, lost);
            }
        }
        if mode.runs_backward() {
            for (service, lost) in &changes.lost_successors {
                self.backward_lost_successors(service, lost);
            }
            for (service, lost) in &changes.lost_ancestors {
                self.backward.remove_covering_sets_with(service, lost);
            }
            for service in changes.new_ancestors.keys() {
                self.backward_new_ancestors(service);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Expiration
    // -----------------------------------------------------------------------

    /// Expire searches and table entries whose time ran out at `now`.
    pub fn sweep(&self, now: Instant) {
        for expired in self.local.remove_expired(now) {
            info!("search: {} expired", expired.search);
            self.listener.composition_time_expired(&expired.search);
            if expired.was_prepared {
                continue;
            }
            let endpoints = [expired.init, expired.goal];
            if let Err(e) = self.update_local_services(&[], &endpoints) {
                warn!("sweeper: could not remove endpoints of {}: {e}", expired.search);
            }
        }

        let forward = self.forward.remove_expired(now);
        let backward = self.backward.remove_expired(now);
        if !forward.is_empty() || !backward.is_empty() {
            debug!(
                "sweeper: {} dropped {} forward and {} backward entries",
                self.peer_id(),
                forward.len(),
                backward.len()
            );
        }

        let mut notified = self.notified.lock().unwrap_or_else(|p| p.into_inner());
        notified.retain(|(search, _)| {
            self.forward.contains(search)
                || self.backward.contains(search)
                || self.local.status(search) != SearchStatus::Unknown
        });
    }
}

impl std::fmt::Debug for CompositionPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionPeer")
            .field("peer", self.peer_id())
            .field("mode", &self.config.search_mode)
            .field("searches", &self.local.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    use svcompose::{BasicTaxonomy, Parameter};

    use crate::collaborators::Route;
    use crate::config::SearchMode;
    use crate::listener::{CompositionEvent, RecordingListener};

    /// Transport that queues every message for the test to deliver.
    #[derive(Default)]
    pub(crate) struct Loopback {
        queue: Mutex<VecDeque<(PeerId, Message)>>,
    }

    impl Transport for Loopback {
        fn send(&self, to: &PeerId, message: Message) {
            self.queue.lock().unwrap().push_back((to.clone(), message));
        }
    }

    impl Loopback {
        pub(crate) fn pop(&self) -> Option<(PeerId, Message)> {
            self.queue.lock().unwrap().pop_front()
        }
    }

    /// A dissemination table for a single isolated peer.
    pub(crate) struct Alone;

    impl Dissemination for Alone {
        fn distance(&self, _: &Parameter, _: &PeerId) -> Option<u32> {
            None
        }
        fn estimated_distance(&self, _: &Parameter) -> Option<u32> {
            None
        }
        fn route(&self, _: &PeerId) -> Option<Route> {
            None
        }
        fn known_parameters(&self) -> BTreeSet<Parameter> {
            BTreeSet::new()
        }
        fn holders(&self, _: &Parameter) -> BTreeSet<PeerId> {
            BTreeSet::new()
        }
        fn publish(&self, _: &BTreeSet<Parameter>, _: &BTreeSet<Parameter>) {}
    }

    pub(crate) fn taxonomy() -> Arc<dyn Taxonomy> {
        let mut t = BasicTaxonomy::new("Thing");
        for c in ["A", "B", "C", "D"] {
            t.add(c, "Thing").unwrap();
        }
        Arc::new(t)
    }

    pub(crate) fn isolated(mode: SearchMode) -> (CompositionPeer, Arc<Loopback>, Arc<RecordingListener>) {
        let transport = Arc::new(Loopback::default());
        let listener = Arc::new(RecordingListener::new());
        let peer = CompositionPeer::new(
            NodeConfig::for_peer("p1").with_mode(mode).with_max_ttl(8),
            taxonomy(),
            transport.clone(),
            Arc::new(Alone),
            listener.clone(),
        );
        (peer, transport, listener)
    }

    /// Deliver queued messages until the network is quiet.
    pub(crate) fn drain(peer: &CompositionPeer, transport: &Loopback) -> usize {
        let mut delivered = 0;
        while let Some((to, message)) = transport.pop() {
            assert_eq!(&to, peer.peer_id());
            peer.handle(message);
            delivered += 1;
        }
        delivered
    }

    fn service(name: &str, inputs: &[&str], outputs: &[&str]) -> Service {
        Service::new(name, PeerId::from("p1"))
            .with_inputs(inputs.iter().copied())
            .with_outputs(outputs.iter().copied())
    }

    /// A → B chain converting A into C on a single peer.
    fn chain(peer: &CompositionPeer) -> (Service, Service) {
        let ab = service("AB", &["A"], &["B"]);
        let bc = service("BC", &["B"], &["C"]);
        peer.manage_local_services(&[ab.clone(), bc.clone()], &[]).unwrap();
        (ab, bc)
    }

    #[tokio::test]
    async fn forward_search_finds_a_local_chain() {
        let (peer, transport, listener) = isolated(SearchMode::Forward);
        let (ab, bc) = chain(&peer);

        let search = peer.start_composition(&service("T", &["A"], &["C"])).unwrap();
        assert!(peer.is_running_search(&search));
        assert!(drain(&peer, &transport) > 0);

        let found = listener.found(&search);
        assert_eq!(found.len(), 1);
        let (composition, _) = &found[0];
        assert!(composition.contains(&ab) && composition.contains(&bc));
        assert!(peer.are_all_inputs_covered(&search, &bc));
    }

    #[tokio::test]
    async fn backward_search_finds_a_local_chain() {
        let (peer, transport, listener) = isolated(SearchMode::Backward);
        let (ab, bc) = chain(&peer);

        let search = peer.start_composition(&service("T", &["A"], &["C"])).unwrap();
        drain(&peer, &transport);

        let found = listener.found(&search);
        assert_eq!(found.len(), 1);
        assert!(found[0].0.contains(&ab) && found[0].0.contains(&bc));
    }

    #[tokio::test]
    async fn nothing_is_found_without_a_chain() {
        let (peer, transport, listener) = isolated(SearchMode::Forward);
        peer.manage_local_services(&[service("AB", &["A"], &["B"])], &[]).unwrap();

        let search = peer.start_composition(&service("T", &["A"], &["D"])).unwrap();
        drain(&peer, &transport);
        assert!(listener.found(&search).is_empty());
    }

    #[tokio::test]
    async fn invalid_targets_are_rejected() {
        let (peer, _, _) = isolated(SearchMode::Forward);
        let err = peer
            .start_composition(&Service::new("", PeerId::from("p1")))
            .unwrap_err();
        assert!(matches!(err, NodeError::Service(_)));
    }

    #[tokio::test]
    async fn removing_a_service_reports_the_composition_lost() {
        let (peer, transport, listener) = isolated(SearchMode::Forward);
        let (ab, _) = chain(&peer);
        let search = peer.start_composition(&service("T", &["A"], &["C"])).unwrap();
        drain(&peer, &transport);

        peer.manage_local_services(&[], &[ab]).unwrap();
        drain(&peer, &transport);
        assert!(listener
            .events_for(&search)
            .iter()
            .any(|e| matches!(e, CompositionEvent::Lost { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_searches_notify_and_drop_their_endpoints() {
        let (peer, transport, listener) = isolated(SearchMode::Forward);
        chain(&peer);
        let target = service("T", &["A"], &["C"]);
        let search = peer.start_composition(&target).unwrap();
        drain(&peer, &transport);
        let services = peer.with_graph(|g| g.local_services().count());

        tokio::time::advance(peer.config().search_expiration).await;
        peer.sweep(Instant::now());

        assert!(listener.expired(&search));
        assert_eq!(peer.search_status(&search), SearchStatus::Unknown);
        assert_eq!(peer.with_graph(|g| g.local_services().count()), services - 2);
    }

    #[tokio::test(start_paused = true)]
    async fn prepared_endpoints_survive_expiry_and_are_reused() {
        let (peer, transport, listener) = isolated(SearchMode::Forward);
        chain(&peer);
        let target = service("T", &["A"], &["C"]);
        let prepared = peer.prepare_composition(&target).unwrap();
        assert_eq!(peer.search_status(&prepared), SearchStatus::Unknown);

        let search = peer.start_composition(&target).unwrap();
        assert_eq!(search, prepared);
        drain(&peer, &transport);
        assert_eq!(listener.found(&search).len(), 1);

        tokio::time::advance(peer.config().search_expiration).await;
        peer.sweep(Instant::now());
        assert!(listener.expired(&search));
        assert_eq!(peer.with_graph(|g| g.local_services().count()), 4);
    }
}
