//! Pairing of collision responses into service connections.
//!
//! The peer that detected a collision collects the responses of every
//! holder of the colliding parameters. Each new response is paired with the
//! responses already stored for the same collision; every producer/consumer
//! pair spanning two peers becomes a remote successor or ancestor entry for
//! the peers involved.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use svcompose::graph::connected_inputs;
use svcompose::types::insert_min;
use svcompose::{Collision, DistanceTable, PeerId, Service, ServiceDistance, Taxonomy};

/// Remote neighbours to disclose to one peer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PeerConnections {
    pub successors: DistanceTable,
    pub ancestors: DistanceTable,
}

impl PeerConnections {
    pub fn is_empty(&self) -> bool {
        self.successors.is_empty() && self.ancestors.is_empty()
    }
}

pub struct ConnectionsManager {
    taxonomy: Arc<dyn Taxonomy>,
    /// Collision → responder → services it answered with.
    responses: BTreeMap<Collision, BTreeMap<PeerId, BTreeSet<ServiceDistance>>>,
}

impl ConnectionsManager {
    pub fn new(taxonomy: Arc<dyn Taxonomy>) -> Self {
        Self {
            taxonomy,
            responses: BTreeMap::new(),
        }
    }

    pub fn contains(&self, collision: &Collision) -> bool {
        self.responses.contains_key(collision)
    }

    /// True when some output of `producer` satisfies an input of `consumer`.
    fn feeds(&self, producer: &Service, consumer: &Service) -> bool {
        !connected_inputs(consumer, producer, self.taxonomy.as_ref()).is_empty()
    }

    /// Record the answer of `responder` to `collisions` and pair its new
    /// services with those of other responders.
    ///
    /// Distances in `services` are relative to the local peer, so the
    /// distance between two responders is the sum of both.
    pub fn add_response(
        &mut self,
        collisions: &BTreeSet<Collision>,
        responder: &PeerId,
        services: &BTreeSet<ServiceDistance>,
    ) -> BTreeMap<PeerId, PeerConnections> {
        let mut out: BTreeMap<PeerId, PeerConnections> = BTreeMap::new();
        for collision in collisions {
            let by_peer = self.responses.entry(collision.clone()).or_default();
            let known = by_peer.entry(responder.clone()).or_default();
            let fresh: Vec<ServiceDistance> = services
                .iter()
                .filter(|sd| !known.contains(*sd))
                .cloned()
                .collect();
            known.extend(fresh.iter().cloned());
            if fresh.is_empty() {
                continue;
            }

            let others: Vec<(PeerId, ServiceDistance)> = by_peer
                .iter()
                .filter(|(p, _)| *p != responder)
                .flat_map(|(p, set)| set.iter().map(move |sd| (p.clone(), sd.clone())))
                .collect();

            for new in &fresh {
                for (other_peer, other) in &others {
                    let distance = new.distance.saturating_add(other.distance);
                    if self.feeds(&new.service, &other.service) {
                        link(&mut out, responder, &new.service, other_peer, &other.service, distance);
                    }
                    if self.feeds(&other.service, &new.service) {
                        link(&mut out, other_peer, &other.service, responder, &new.service, distance);
                    }
                }
            }
        }
        out
    }

    /// Forget `services` answered by `peer`. Returns, per remaining
    /// responder, the services it must disconnect.
    pub fn remove_services(
        &mut self,
        peer: &PeerId,
        services: &BTreeSet<Service>,
    ) -> BTreeMap<PeerId, BTreeSet<Service>> {
        let mut notify: BTreeMap<PeerId, BTreeSet<Service>> = BTreeMap::new();
        for by_peer in self.responses.values_mut() {
            let Some(answered) = by_peer.get_mut(peer) else {
                continue;
            };
            let before = answered.len();
            answered.retain(|sd| !services.contains(&sd.service));
            if answered.len() == before {
                continue;
            }
            for other in by_peer.keys().filter(|p| *p != peer) {
                notify
                    .entry(other.clone())
                    .or_default()
                    .extend(services.iter().cloned());
            }
        }
        notify
    }

    /// Drop every response from `lost` peers. Returns, per remaining
    /// responder, the services that became unreachable.
    pub fn lost_destinations(&mut self, lost: &BTreeSet<PeerId>) -> BTreeMap<PeerId, BTreeSet<Service>> {
        let mut notify: BTreeMap<PeerId, BTreeSet<Service>> = BTreeMap::new();
        for by_peer in self.responses.values_mut() {
            let gone: BTreeSet<Service> = by_peer
                .iter()
                .filter(|(p, _)| lost.contains(*p))
                .flat_map(|(_, set)| set.iter().map(|sd| sd.service.clone()))
                .collect();
            by_peer.retain(|p, _| !lost.contains(p));
            if gone.is_empty() {
                continue;
            }
            for other in by_peer.keys() {
                notify.entry(other.clone()).or_default().extend(gone.iter().cloned());
            }
        }
        notify
    }
}

/// Record `producer → consumer` for both peers involved.
fn link(
    out: &mut BTreeMap<PeerId, PeerConnections>,
    producer_peer: &PeerId,
    producer: &Service,
    consumer_peer: &PeerId,
    consumer: &Service,
    distance: u32,
) {
    insert_min(
        out.entry(producer_peer.clone())
            .or_default()
            .successors
            .entry(producer.clone())
            .or_default(),
        ServiceDistance::new(consumer.clone(), distance),
    );
    insert_min(
        out.entry(consumer_peer.clone())
            .or_default()
            .ancestors
            .entry(consumer.clone())
            .or_default(),
        ServiceDistance::new(producer.clone(), distance),
    );
}
