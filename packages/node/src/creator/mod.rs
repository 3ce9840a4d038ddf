//! Collision-based construction of the service dependency graph.
//!
//! [`CollisionGraphCreator`] owns the local [`ServiceDependencyGraph`] and
//! keeps it consistent with the rest of the overlay:
//!
//! 1. Local service changes publish and withdraw parameters and run
//!    collision detection against every parameter known in the overlay.
//! 2. The detector asks every holder of the colliding parameters for its
//!    compatible services (`CollisionMessage`), pairs the answers
//!    (`CollisionResponseMessage`) and discloses the resulting remote
//!    neighbours (`ConnectServicesMessage`).
//! 3. Service removals and lost peers travel back the same way as
//!    `RemovedServicesMessage` and `DisconnectServicesMessage`.
//!
//! Every graph mutation is diffed into a [`GraphChanges`] value, which the
//! caller hands to the composition searches.

pub mod connections;
pub mod params;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use svcompose::{
    detect, Collision, IdGenerator, Inhibition, Parameter, PeerId, RouteId, SdgError, Service,
    ServiceDependencyGraph, ServiceDistance, Taxonomy,
};
use svcompose_wire::{
    CollisionMessage, CollisionResponseMessage, ConnectServicesMessage, DisconnectServicesMessage,
    ForwardMessage, InhibeCollisionsMessage, Message, RemovedServicesMessage,
};
use tracing::{debug, trace, warn};

use crate::collaborators::{Dissemination, Transport};
use connections::ConnectionsManager;
use params::ParameterCounter;

// ---------------------------------------------------------------------------
// GraphChanges
// ---------------------------------------------------------------------------

/// Neighbour relations of local services that appeared or disappeared in
/// one graph mutation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GraphChanges {
    pub new_successors: BTreeMap<Service, BTreeSet<ServiceDistance>>,
    pub new_ancestors: BTreeMap<Service, BTreeSet<ServiceDistance>>,
    pub lost_successors: BTreeMap<Service, BTreeSet<Service>>,
    pub lost_ancestors: BTreeMap<Service, BTreeSet<Service>>,
}

impl GraphChanges {
    pub fn is_empty(&self) -> bool {
        self.new_successors.is_empty()
            && self.new_ancestors.is_empty()
            && self.lost_successors.is_empty()
            && self.lost_ancestors.is_empty()
    }

    pub fn merge(&mut self, other: GraphChanges) {
        for (k, v) in other.new_successors {
            self.new_successors.entry(k).or_default().extend(v);
        }
        for (k, v) in other.new_ancestors {
            self.new_ancestors.entry(k).or_default().extend(v);
        }
        for (k, v) in other.lost_successors {
            self.lost_successors.entry(k).or_default().extend(v);
        }
        for (k, v) in other.lost_ancestors {
            self.lost_ancestors.entry(k).or_default().extend(v);
        }
    }
}

type Neighbours = BTreeMap<Service, (BTreeSet<ServiceDistance>, BTreeSet<ServiceDistance>)>;

fn appeared(after: &BTreeSet<ServiceDistance>, before: Option<&BTreeSet<ServiceDistance>>) -> BTreeSet<ServiceDistance> {
    after
        .iter()
        .filter(|sd| before.map_or(true, |b| !b.contains(*sd)))
        .cloned()
        .collect()
}

fn disappeared(before: &BTreeSet<ServiceDistance>, after: &BTreeSet<ServiceDistance>) -> BTreeSet<Service> {
    before
        .iter()
        .filter(|sd| !after.contains(*sd))
        .map(|sd| sd.service.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// CollisionGraphCreator
// ---------------------------------------------------------------------------

pub struct CollisionGraphCreator {
    peer: PeerId,
    sdg: ServiceDependencyGraph,
    taxonomy: Arc<dyn Taxonomy>,
    params: ParameterCounter,
    connections: ConnectionsManager,
    /// Collision → the peer that detected it.
    managed: BTreeMap<Collision, PeerId>,
    /// Local service → detectors it was reported to.
    reported: BTreeMap<Service, BTreeSet<PeerId>>,
    ids: Arc<IdGenerator>,
    transport: Arc<dyn Transport>,
    dissemination: Arc<dyn Dissemination>,
    multiple_paths: bool,
}

impl CollisionGraphCreator {
    pub fn new(
        taxonomy: Arc<dyn Taxonomy>,
        ids: Arc<IdGenerator>,
        transport: Arc<dyn Transport>,
        dissemination: Arc<dyn Dissemination>,
        multiple_paths: bool,
    ) -> Self {
        let peer = ids.peer().clone();
        Self {
            sdg: ServiceDependencyGraph::new(peer.clone(), Arc::clone(&taxonomy)),
            connections: ConnectionsManager::new(Arc::clone(&taxonomy)),
            peer,
            taxonomy,
            params: ParameterCounter::new(),
            managed: BTreeMap::new(),
            reported: BTreeMap::new(),
            ids,
            transport,
            dissemination,
            multiple_paths,
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn sdg(&self) -> &ServiceDependencyGraph {
        &self.sdg
    }

    pub fn taxonomy(&self) -> &dyn Taxonomy {
        self.taxonomy.as_ref()
    }

    /// Collisions this peer knows about, with their detector.
    pub fn managed_collisions(&self) -> &BTreeMap<Collision, PeerId> {
        &self.managed
    }

    fn send(&self, to: &PeerId, message: impl Into<Message>) {
        self.transport.send(to, message.into());
    }

    fn snapshot(&self) -> Neighbours {
        self.sdg
            .local_services()
            .map(|s| (s.clone(), (self.sdg.successors(s), self.sdg.ancestors(s))))
            .collect()
    }

    fn changes_since(&self, before: &Neighbours) -> GraphChanges {
        let after = self.snapshot();
        let mut changes = GraphChanges::default();
        let empty = BTreeSet::new();
        for (service, (succ, anc)) in &after {
            let prev = before.get(service);
            let new_succ = appeared(succ, prev.map(|p| &p.0));
            let new_anc = appeared(anc, prev.map(|p| &p.1));
            let lost_succ = disappeared(prev.map_or(&empty, |p| &p.0), succ);
            let lost_anc = disappeared(prev.map_or(&empty, |p| &p.1), anc);
            if !new_succ.is_empty() {
                changes.new_successors.insert(service.clone(), new_succ);
            }
            if !new_anc.is_empty() {
                changes.new_ancestors.insert(service.clone(), new_anc);
            }
            if !lost_succ.is_empty() {
                changes.lost_successors.insert(service.clone(), lost_succ);
            }
            if !lost_anc.is_empty() {
                changes.lost_ancestors.insert(service.clone(), lost_anc);
            }
        }
        changes
    }

    // -----------------------------------------------------------------------
    // Local services
    // -----------------------------------------------------------------------

    /// Remove then add local services, announcing the parameter changes and
    /// the collisions they introduce.
    ///
    /// Fails before touching anything if a service is not hosted locally.
    pub fn manage_local_services(
        &mut self,
        added: &[Service],
        removed: &[Service],
    ) -> Result<GraphChanges, SdgError> {
        if let Some(s) = added.iter().chain(removed).find(|s| s.peer != self.peer) {
            return Err(SdgError::NonLocalService(s.clone()));
        }
        let before = self.snapshot();

        let mut withdrawn = BTreeSet::new();
        let mut removals: BTreeMap<PeerId, BTreeSet<Service>> = BTreeMap::new();
        for service in removed {
            if !self.sdg.is_local(service) {
                continue;
            }
            self.sdg.remove_local_service(service)?;
            withdrawn.extend(self.params.remove_service(service));
            for detector in self.reported.remove(service).unwrap_or_default() {
                removals.entry(detector).or_default().insert(service.clone());
            }
        }

        let mut published = BTreeSet::new();
        let mut fresh = Vec::new();
        for service in added {
            if self.sdg.add_local_service(service)? {
                published.extend(self.params.add_service(service));
                fresh.push(service.clone());
            }
        }

        if !published.is_empty() || !withdrawn.is_empty() {
            self.dissemination.publish(&published, &withdrawn);
        }
        for (detector, services) in removals {
            debug!("creator: {} removed {} services reported to {detector}", self.peer, services.len());
            self.send(&detector, RemovedServicesMessage::new(self.peer.clone(), services));
        }

        let detected = self.detect_collisions(&published);
        self.respond_to_known_collisions(&fresh, &detected);

        Ok(self.changes_since(&before))
    }

    /// Detect collisions introduced by `published` and start a collision
    /// round for those nobody manages yet. Returns the collisions taken over.
    fn detect_collisions(&mut self, published: &BTreeSet<Parameter>) -> BTreeSet<Collision> {
        let mut all = self.dissemination.known_parameters();
        all.extend(published.iter().cloned());
        let candidates = detect(published, &all, true, self.taxonomy.as_ref());

        let mut by_holder: BTreeMap<PeerId, BTreeSet<Collision>> = BTreeMap::new();
        let mut taken = BTreeSet::new();
        for collision in candidates {
            if self.managed.contains_key(&collision) {
                trace!("creator: {collision} already managed");
                continue;
            }
            let mut holders = self.dissemination.holders(&collision.input);
            holders.extend(self.dissemination.holders(&collision.output));
            if holders.iter().all(|h| *h == self.peer) {
                continue;
            }
            for holder in holders {
                by_holder.entry(holder).or_default().insert(collision.clone());
            }
            self.managed.insert(collision.clone(), self.peer.clone());
            taken.insert(collision);
        }
        if taken.is_empty() {
            return taken;
        }

        debug!("creator: {} detected {} collisions", self.peer, taken.len());
        let route = self.ids.next_message_id();
        for (holder, collisions) in by_holder {
            if holder != self.peer {
                let inhibitions = collisions
                    .iter()
                    .map(|c| Inhibition::new(c.clone(), self.peer.clone()))
                    .collect();
                self.send(&holder, InhibeCollisionsMessage::new(self.peer.clone(), inhibitions));
            }
            self.send(&holder, CollisionMessage::new(self.peer.clone(), route.clone(), collisions));
        }
        taken
    }

    /// New services whose parameters were already part of managed
    /// collisions answer those collisions without being asked.
    fn respond_to_known_collisions(&mut self, fresh: &[Service], detected: &BTreeSet<Collision>) {
        for service in fresh {
            let mut by_detector: BTreeMap<PeerId, BTreeSet<Collision>> = BTreeMap::new();
            for (collision, detector) in &self.managed {
                if detected.contains(collision) {
                    continue;
                }
                if service.parameters.iter().any(|p| collision.involves(p)) {
                    by_detector.entry(detector.clone()).or_default().insert(collision.clone());
                }
            }
            for (detector, collisions) in by_detector {
                let services = [ServiceDistance::local(service.clone())].into_iter().collect();
                let response = CollisionResponseMessage::new(
                    self.peer.clone(),
                    self.ids.next_message_id(),
                    collisions,
                    services,
                );
                self.reported
                    .entry(service.clone())
                    .or_default()
                    .insert(detector.clone());
                self.send(&detector, response);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Incoming messages
    // -----------------------------------------------------------------------

    /// Apply a graph-construction message. Other messages are ignored.
    pub fn handle(&mut self, message: Message) -> GraphChanges {
        match message {
            Message::Collision(m) => {
                self.on_collision(m);
                GraphChanges::default()
            }
            Message::CollisionResponse(m) => {
                self.on_collision_response(m);
                GraphChanges::default()
            }
            Message::Inhibe(m) => {
                for inhibition in m.inhibitions {
                    self.managed
                        .entry(inhibition.collision)
                        .or_insert(inhibition.detected_by);
                }
                GraphChanges::default()
            }
            Message::RemovedServices(m) => {
                self.on_removed_services(m);
                GraphChanges::default()
            }
            Message::ConnectServices(m) => self.on_connect_services(m),
            Message::DisconnectServices(m) => self.on_disconnect_services(m),
            other => {
                trace!("creator: ignoring {}", other.message_type());
                GraphChanges::default()
            }
        }
    }

    fn on_collision(&mut self, m: CollisionMessage) {
        for collision in &m.collisions {
            self.managed
                .entry(collision.clone())
                .or_insert_with(|| m.source.clone());
        }
        let parameters: BTreeSet<Parameter> = m
            .collisions
            .iter()
            .flat_map(|c| [c.input.clone(), c.output.clone()])
            .collect();
        let services = self.sdg.find_local_compatible_services(&parameters);
        if services.is_empty() {
            return;
        }
        for service in &services {
            self.reported
                .entry(service.clone())
                .or_default()
                .insert(m.source.clone());
        }
        let services = services.into_iter().map(ServiceDistance::local).collect();
        self.send(
            &m.source,
            CollisionResponseMessage::new(self.peer.clone(), m.route, m.collisions, services),
        );
    }

    fn distance_to(&self, peer: &PeerId, collisions: &BTreeSet<Collision>) -> u32 {
        if *peer == self.peer {
            return 0;
        }
        self.dissemination
            .route(peer)
            .map(|r| r.distance)
            .or_else(|| {
                collisions
                    .iter()
                    .flat_map(|c| [&c.input, &c.output])
                    .filter_map(|p| self.dissemination.estimated_distance(p))
                    .max()
            })
            .unwrap_or(1)
    }

    fn on_collision_response(&mut self, mut m: CollisionResponseMessage) {
        let own: BTreeSet<Collision> = m
            .collisions
            .iter()
            .filter(|c| self.managed.get(*c) == Some(&self.peer))
            .cloned()
            .collect();
        if own.is_empty() {
            trace!("creator: response from {} for unmanaged collisions", m.source);
            return;
        }
        let hops = self.distance_to(&m.source, &own);
        m.add_distance(hops);
        let disclosures = self.connections.add_response(&own, &m.source, &m.services);
        for (peer, conn) in disclosures {
            if conn.is_empty() {
                continue;
            }
            debug!("creator: connecting services of {peer}");
            self.send(
                &peer,
                ConnectServicesMessage::new(self.peer.clone(), conn.successors, conn.ancestors),
            );
        }
    }

    fn on_connect_services(&mut self, m: ConnectServicesMessage) -> GraphChanges {
        let before = self.snapshot();
        for (local, remote) in m.successors.iter().chain(m.ancestors.iter()) {
            if !self.sdg.is_local(local) {
                warn!("creator: {} disclosed neighbours of unknown service {local}", m.source);
                continue;
            }
            if let Err(e) = self.sdg.connect_remote_services(local, remote, &m.source) {
                warn!("creator: {e}");
            }
        }
        self.changes_since(&before)
    }

    fn on_disconnect_services(&mut self, m: DisconnectServicesMessage) -> GraphChanges {
        let before = self.snapshot();
        if m.services_were_removed {
            for service in &m.services {
                self.sdg.remove_service_connected_by(service, &m.source);
            }
        } else {
            let dests: BTreeSet<&PeerId> = m.services.iter().map(|s| &s.peer).collect();
            for dest in dests {
                self.sdg.remove_services_from_route(&RouteId {
                    dest: dest.clone(),
                    through: m.source.clone(),
                });
            }
        }
        self.changes_since(&before)
    }

    fn on_removed_services(&mut self, m: RemovedServicesMessage) {
        for (peer, services) in self.connections.remove_services(&m.source, &m.services) {
            self.send(&peer, DisconnectServicesMessage::new(self.peer.clone(), services, true));
        }
    }

    /// Forget everything that depended on `peers`.
    pub fn lost_destinations(&mut self, peers: &BTreeSet<PeerId>) -> GraphChanges {
        for (peer, services) in self.connections.lost_destinations(peers) {
            self.send(&peer, DisconnectServicesMessage::new(self.peer.clone(), services, false));
        }
        let before = self.snapshot();
        self.sdg.check_services(peers);
        self.managed.retain(|_, detector| !peers.contains(detector));
        self.reported.retain(|_, detectors| {
            detectors.retain(|d| !peers.contains(d));
            !detectors.is_empty()
        });
        self.changes_since(&before)
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Send `payload` to the peers hosting `destinations`.
    ///
    /// Peers with a known direct route get the payload itself; others are
    /// reached through the collision peer that disclosed their services.
    pub fn forward_message(&self, payload: Message, destinations: &BTreeSet<Service>) {
        let mut by_peer: BTreeMap<&PeerId, BTreeSet<Service>> = BTreeMap::new();
        for service in destinations {
            by_peer.entry(&service.peer).or_default().insert(service.clone());
        }
        for (peer, services) in by_peer {
            if *peer == self.peer || self.dissemination.knows_route_to(peer) {
                self.transport.send(peer, payload.clone());
                continue;
            }
            let routes = self.sdg.routes(peer);
            if routes.is_empty() {
                warn!("creator: no route to {peer}, dropping {}", payload.message_type());
                continue;
            }
            let count = if self.multiple_paths { 2 } else { 1 };
            for route in routes.into_iter().take(count) {
                if route.through == self.peer {
                    self.transport.send(peer, payload.clone());
                } else {
                    trace!("creator: relaying to {peer} through {}", route.through);
                    self.send(
                        &route.through,
                        ForwardMessage::new(self.peer.clone(), services.clone(), payload.clone()),
                    );
                }
            }
        }
    }

    /// Deliver a relayed payload to its non-local destinations directly.
    pub fn relay(&self, payload: &Message, destinations: &BTreeSet<Service>) {
        let peers: BTreeSet<&PeerId> = destinations
            .iter()
            .map(|s| &s.peer)
            .filter(|p| **p != self.peer)
            .collect();
        for peer in peers {
            self.transport.send(peer, payload.clone());
        }
    }
}

impl std::fmt::Debug for CollisionGraphCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollisionGraphCreator")
            .field("peer", &self.peer)
            .field("sdg", &self.sdg)
            .field("managed", &self.managed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Route;
    use std::sync::Mutex;
    use svcompose::{BasicTaxonomy, MessageId};

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(PeerId, Message)>>);

    impl Transport for Outbox {
        fn send(&self, to: &PeerId, message: Message) {
            self.0.lock().unwrap().push((to.clone(), message));
        }
    }

    impl Outbox {
        fn take(&self) -> Vec<(PeerId, Message)> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    /// Static view: `holders` per parameter, every peer one hop away.
    #[derive(Default)]
    struct Table {
        holders: Mutex<BTreeMap<Parameter, BTreeSet<PeerId>>>,
        me: Option<PeerId>,
        no_routes: bool,
    }

    impl Dissemination for Table {
        fn distance(&self, _: &Parameter, _: &PeerId) -> Option<u32> {
            Some(1)
        }
        fn estimated_distance(&self, _: &Parameter) -> Option<u32> {
            Some(1)
        }
        fn route(&self, _: &PeerId) -> Option<Route> {
            (!self.no_routes).then_some(Route { distance: 1 })
        }
        fn known_parameters(&self) -> BTreeSet<Parameter> {
            self.holders.lock().unwrap().keys().cloned().collect()
        }
        fn holders(&self, parameter: &Parameter) -> BTreeSet<PeerId> {
            self.holders
                .lock()
                .unwrap()
                .get(parameter)
                .cloned()
                .unwrap_or_default()
        }
        fn publish(&self, added: &BTreeSet<Parameter>, removed: &BTreeSet<Parameter>) {
            let me = self.me.clone().unwrap();
            let mut h = self.holders.lock().unwrap();
            for p in added {
                h.entry(p.clone()).or_default().insert(me.clone());
            }
            for p in removed {
                if let Some(set) = h.get_mut(p) {
                    set.remove(&me);
                }
            }
            h.retain(|_, s| !s.is_empty());
        }
    }

    fn taxonomy() -> Arc<dyn Taxonomy> {
        let mut t = BasicTaxonomy::new("Thing");
        t.add("A", "Thing").unwrap();
        t.add("B", "A").unwrap();
        Arc::new(t)
    }

    fn creator(peer: &str, table: Table) -> (CollisionGraphCreator, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        let table = Arc::new(Table {
            me: Some(PeerId::from(peer)),
            ..table
        });
        let c = CollisionGraphCreator::new(
            taxonomy(),
            Arc::new(IdGenerator::new(PeerId::from(peer))),
            outbox.clone(),
            table,
            false,
        );
        (c, outbox)
    }

    fn remote_holder(param: Parameter, peer: &str) -> Table {
        let mut holders = BTreeMap::new();
        holders.insert(param, [PeerId::from(peer)].into_iter().collect());
        Table {
            holders: Mutex::new(holders),
            ..Table::default()
        }
    }

    #[test]
    fn non_local_services_are_rejected_without_side_effects() {
        let (mut c, outbox) = creator("p1", Table::default());
        let remote = Service::new("R", PeerId::from("p2")).with_inputs(["A"]);
        let local = Service::new("L", PeerId::from("p1")).with_outputs(["B"]);
        let err = c.manage_local_services(&[local.clone(), remote], &[]).unwrap_err();
        assert!(matches!(err, SdgError::NonLocalService(_)));
        assert!(!c.sdg().contains(&local));
        assert!(outbox.take().is_empty());
    }

    #[test]
    fn local_wiring_is_reported_as_changes() {
        let (mut c, _) = creator("p1", Table::default());
        let producer = Service::new("P", PeerId::from("p1")).with_outputs(["B"]);
        let consumer = Service::new("C", PeerId::from("p1")).with_inputs(["A"]);
        c.manage_local_services(&[producer.clone()], &[]).unwrap();
        let changes = c.manage_local_services(&[consumer.clone()], &[]).unwrap();
        assert!(changes.new_successors[&producer].contains(&ServiceDistance::local(consumer.clone())));
        assert!(changes.new_ancestors[&consumer].contains(&ServiceDistance::local(producer.clone())));

        let changes = c.manage_local_services(&[], &[producer.clone()]).unwrap();
        assert_eq!(
            changes.lost_ancestors.get(&consumer),
            Some(&[producer].into_iter().collect())
        );
    }

    #[test]
    fn purely_local_collisions_are_not_announced() {
        let (mut c, outbox) = creator("p1", Table::default());
        let producer = Service::new("P", PeerId::from("p1")).with_outputs(["B"]);
        let consumer = Service::new("C", PeerId::from("p1")).with_inputs(["A"]);
        c.manage_local_services(&[producer, consumer], &[]).unwrap();
        assert!(outbox.take().is_empty());
        assert!(c.managed_collisions().is_empty());
    }

    #[test]
    fn remote_collisions_start_a_round_and_inhibit_the_holder() {
        let (mut c, outbox) = creator("p1", remote_holder(Parameter::input("A"), "p2"));
        let producer = Service::new("P", PeerId::from("p1")).with_outputs(["B"]);
        c.manage_local_services(&[producer], &[]).unwrap();

        let sent = outbox.take();
        let to_p2: Vec<_> = sent.iter().filter(|(p, _)| p.as_str() == "p2").collect();
        assert!(to_p2.iter().any(|(_, m)| matches!(m, Message::Inhibe(_))));
        assert!(to_p2.iter().any(|(_, m)| matches!(m, Message::Collision(_))));
        assert!(sent
            .iter()
            .any(|(p, m)| p.as_str() == "p1" && matches!(m, Message::Collision(_))));
        assert_eq!(c.managed_collisions().len(), 1);
    }

    #[test]
    fn holders_answer_with_their_compatible_services() {
        let (mut c, outbox) = creator("p2", Table::default());
        let consumer = Service::new("C", PeerId::from("p2")).with_inputs(["A"]);
        c.manage_local_services(&[consumer.clone()], &[]).unwrap();
        outbox.take();

        let collision = Collision::new(Parameter::input("A"), Parameter::output("B"));
        c.handle(
            CollisionMessage::new(
                PeerId::from("p1"),
                MessageId::new(PeerId::from("p1"), 9),
                [collision.clone()].into_iter().collect(),
            )
            .into(),
        );
        let sent = outbox.take();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            (to, Message::CollisionResponse(r)) => {
                assert_eq!(to.as_str(), "p1");
                assert!(r.services.contains(&ServiceDistance::local(consumer)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(c.managed_collisions().get(&collision), Some(&PeerId::from("p1")));
    }

    #[test]
    fn connect_services_wire_remote_neighbours() {
        let (mut c, _) = creator("p2", Table::default());
        let consumer = Service::new("C", PeerId::from("p2")).with_inputs(["A"]);
        c.manage_local_services(&[consumer.clone()], &[]).unwrap();

        let producer = Service::new("P", PeerId::from("p3")).with_outputs(["B"]);
        let mut ancestors = BTreeMap::new();
        ancestors.insert(
            consumer.clone(),
            [ServiceDistance::new(producer.clone(), 2)].into_iter().collect(),
        );
        let changes = c.handle(
            ConnectServicesMessage::new(PeerId::from("p1"), BTreeMap::new(), ancestors).into(),
        );
        assert!(changes.new_ancestors[&consumer].contains(&ServiceDistance::local(producer.clone())));

        let changes = c.handle(
            DisconnectServicesMessage::new(
                PeerId::from("p1"),
                [producer.clone()].into_iter().collect(),
                true,
            )
            .into(),
        );
        assert!(changes.lost_ancestors[&consumer].contains(&producer));
        assert!(!c.sdg().contains(&producer));
    }

    #[test]
    fn unreachable_peers_are_reached_through_the_collision_peer() {
        let (mut c, outbox) = creator(
            "p2",
            Table {
                no_routes: true,
                ..Table::default()
            },
        );
        let consumer = Service::new("C", PeerId::from("p2")).with_inputs(["A"]);
        c.manage_local_services(&[consumer.clone()], &[]).unwrap();
        let producer = Service::new("P", PeerId::from("p5")).with_outputs(["B"]);
        let mut ancestors = BTreeMap::new();
        ancestors.insert(consumer, [ServiceDistance::new(producer.clone(), 4)].into_iter().collect());
        c.handle(ConnectServicesMessage::new(PeerId::from("p1"), BTreeMap::new(), ancestors).into());
        outbox.take();

        let payload: Message = RemovedServicesMessage::new(PeerId::from("p2"), BTreeSet::new()).into();
        c.forward_message(payload, &[producer].into_iter().collect());
        let sent = outbox.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "p1");
        assert!(matches!(sent[0].1, Message::Forward(_)));
    }

    #[test]
    fn lost_destinations_drop_their_services() {
        let (mut c, _) = creator("p2", Table::default());
        let consumer = Service::new("C", PeerId::from("p2")).with_inputs(["A"]);
        c.manage_local_services(&[consumer.clone()], &[]).unwrap();
        let producer = Service::new("P", PeerId::from("p3")).with_outputs(["B"]);
        let mut ancestors = BTreeMap::new();
        ancestors.insert(consumer.clone(), [ServiceDistance::new(producer.clone(), 2)].into_iter().collect());
        c.handle(ConnectServicesMessage::new(PeerId::from("p1"), BTreeMap::new(), ancestors).into());

        let changes = c.lost_destinations(&[PeerId::from("p3")].into_iter().collect());
        assert!(changes.lost_ancestors[&consumer].contains(&producer));
    }
}
