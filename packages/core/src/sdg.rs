//! The service dependency graph (SDG) each peer keeps.
//!
//! Local services are added directly. Remote services are only ever added
//! through [`ServiceDependencyGraph::connect_remote_services`], tagged with
//! the collision peer that disclosed them and the hop distance it reported.
//! A remote service stays in the graph while at least one disclosure for it
//! remains.
//!
//! All local-only operations check locality before touching any state, so a
//! failed call leaves the graph exactly as it was.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::ServiceGraph;
use crate::taxonomy::Taxonomy;
use crate::types::{Parameter, PeerId, Service, ServiceDistance};

#[derive(Debug, Error, PartialEq)]
pub enum SdgError {
    #[error("service {0} is not hosted by the local peer")]
    NonLocalService(Service),
}

/// Route to `dest` learned through collision peer `through`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteId {
    pub dest: PeerId,
    pub through: PeerId,
}

/// An indirect route with the distance disclosed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectRoute {
    pub dest: PeerId,
    pub through: PeerId,
    pub distance: u32,
}

/// Neighbour relations lost when remote services disappear, keyed by the
/// local service that lost them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LostConnections {
    pub ancestors: BTreeMap<Service, BTreeSet<Service>>,
    pub successors: BTreeMap<Service, BTreeSet<Service>>,
}

impl LostConnections {
    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty() && self.successors.is_empty()
    }

    pub fn merge(&mut self, other: LostConnections) {
        for (k, v) in other.ancestors {
            self.ancestors.entry(k).or_default().extend(v);
        }
        for (k, v) in other.successors {
            self.successors.entry(k).or_default().extend(v);
        }
    }
}

pub struct ServiceDependencyGraph {
    local_peer: PeerId,
    graph: ServiceGraph,
    taxonomy: Arc<dyn Taxonomy>,
    /// Remote service → collision peer → disclosed distance.
    disclosures: BTreeMap<Service, BTreeMap<PeerId, u32>>,
}

impl ServiceDependencyGraph {
    pub fn new(local_peer: PeerId, taxonomy: Arc<dyn Taxonomy>) -> Self {
        Self {
            local_peer,
            graph: ServiceGraph::new(),
            taxonomy,
            disclosures: BTreeMap::new(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn taxonomy(&self) -> &dyn Taxonomy {
        self.taxonomy.as_ref()
    }

    pub fn graph(&self) -> &ServiceGraph {
        &self.graph
    }

    fn ensure_local(&self, service: &Service) -> Result<(), SdgError> {
        if service.peer == self.local_peer {
            Ok(())
        } else {
            Err(SdgError::NonLocalService(service.clone()))
        }
    }

    // -----------------------------------------------------------------------
    // Local services
    // -----------------------------------------------------------------------

    /// Add a local service. Returns `false` if it was already present.
    pub fn add_local_service(&mut self, service: &Service) -> Result<bool, SdgError> {
        self.ensure_local(service)?;
        Ok(self.graph.merge(service, self.taxonomy.as_ref()))
    }

    /// Remove a local service, then drop remote services it leaves with no
    /// connection to anything. Returns those remote services.
    pub fn remove_local_service(&mut self, service: &Service) -> Result<BTreeSet<Service>, SdgError> {
        self.ensure_local(service)?;
        if !self.graph.remove(service) {
            return Ok(BTreeSet::new());
        }
        let orphans: BTreeSet<Service> = self
            .graph
            .services()
            .filter(|s| s.peer != self.local_peer && self.graph.is_disconnected(s))
            .cloned()
            .collect();
        for orphan in &orphans {
            self.graph.remove(orphan);
            self.disclosures.remove(orphan);
        }
        Ok(orphans)
    }

    // -----------------------------------------------------------------------
    // Remote services
    // -----------------------------------------------------------------------

    /// Record remote neighbours of `local` disclosed by `collision_peer`.
    ///
    /// Returns the remote services that were not in the graph before. Entries
    /// naming local services are ignored; local wiring comes from
    /// [`add_local_service`](Self::add_local_service).
    pub fn connect_remote_services(
        &mut self,
        local: &Service,
        remote: &BTreeSet<ServiceDistance>,
        collision_peer: &PeerId,
    ) -> Result<BTreeSet<ServiceDistance>, SdgError> {
        self.ensure_local(local)?;
        let mut added = BTreeSet::new();
        if !self.graph.contains(local) {
            return Ok(added);
        }
        for rd in remote {
            if rd.service.peer == self.local_peer {
                continue;
            }
            if self.graph.merge(&rd.service, self.taxonomy.as_ref()) {
                added.insert(rd.clone());
            }
            let by_peer = self.disclosures.entry(rd.service.clone()).or_default();
            let d = by_peer.entry(collision_peer.clone()).or_insert(rd.distance);
            *d = (*d).min(rd.distance);
        }
        Ok(added)
    }

    /// Withdraw the disclosure of `service` by `peer`. The service leaves the
    /// graph when no other peer vouches for it; returns `true` in that case.
    pub fn remove_service_connected_by(&mut self, service: &Service, peer: &PeerId) -> bool {
        let Some(by_peer) = self.disclosures.get_mut(service) else {
            return false;
        };
        by_peer.remove(peer);
        if by_peer.is_empty() {
            self.disclosures.remove(service);
            self.graph.remove(service);
            return true;
        }
        false
    }

    /// Withdraw every disclosure of services on `route.dest` made by
    /// `route.through`. Returns the services that left the graph.
    pub fn remove_services_from_route(&mut self, route: &RouteId) -> BTreeSet<Service> {
        let affected: Vec<Service> = self
            .disclosures
            .iter()
            .filter(|(s, by)| s.peer == route.dest && by.contains_key(&route.through))
            .map(|(s, _)| s.clone())
            .collect();
        affected
            .into_iter()
            .filter(|s| self.remove_service_connected_by(s, &route.through))
            .collect()
    }

    /// Drop a remote service regardless of who disclosed it.
    pub fn remove_remote_service(&mut self, service: &Service) -> bool {
        if service.peer == self.local_peer {
            return false;
        }
        self.disclosures.remove(service);
        self.graph.remove(service)
    }

    /// Relations local services would lose if `services` disappeared.
    pub fn lost_connections(&self, services: &BTreeSet<Service>) -> LostConnections {
        let mut lost = LostConnections::default();
        for remote in services {
            if !self.graph.contains(remote) {
                continue;
            }
            for successor in self.graph.successors(remote) {
                if successor.peer == self.local_peer {
                    lost.ancestors.entry(successor).or_default().insert(remote.clone());
                }
            }
            for ancestor in self.graph.ancestors(remote) {
                if ancestor.peer == self.local_peer {
                    lost.successors.entry(ancestor).or_default().insert(remote.clone());
                }
            }
        }
        lost
    }

    /// Forget everything learned from or about `lost` peers.
    ///
    /// Disclosures made by a lost peer are withdrawn and services hosted on a
    /// lost peer are removed. Returns the relations local services lost.
    pub fn check_services(&mut self, lost: &BTreeSet<PeerId>) -> LostConnections {
        let mut gone = BTreeSet::new();
        for (service, by_peer) in &self.disclosures {
            let remaining = by_peer.keys().filter(|p| !lost.contains(*p)).count();
            if lost.contains(&service.peer) || remaining == 0 {
                gone.insert(service.clone());
            }
        }
        let connections = self.lost_connections(&gone);
        for service in &gone {
            self.remove_remote_service(service);
        }
        for by_peer in self.disclosures.values_mut() {
            by_peer.retain(|p, _| !lost.contains(p));
        }
        connections
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn distance_of(&self, service: &Service) -> Option<u32> {
        if service.peer == self.local_peer {
            return Some(0);
        }
        self.disclosures
            .get(service)
            .and_then(|by| by.values().copied().min())
    }

    fn annotate(&self, services: BTreeSet<Service>) -> BTreeSet<ServiceDistance> {
        services
            .into_iter()
            .filter_map(|s| self.distance_of(&s).map(|d| ServiceDistance::new(s, d)))
            .collect()
    }

    fn annotate_by(&self, services: BTreeSet<Service>, peer: &PeerId) -> BTreeSet<ServiceDistance> {
        services
            .into_iter()
            .filter_map(|s| {
                let d = self.disclosures.get(&s)?.get(peer)?;
                Some(ServiceDistance::new(s, *d))
            })
            .collect()
    }

    /// Successors of `service`: local ones at distance 0, remote ones at the
    /// smallest disclosed distance.
    pub fn successors(&self, service: &Service) -> BTreeSet<ServiceDistance> {
        self.annotate(self.graph.successors(service))
    }

    pub fn ancestors(&self, service: &Service) -> BTreeSet<ServiceDistance> {
        self.annotate(self.graph.ancestors(service))
    }

    /// Remote successors disclosed by `peer`.
    pub fn successors_by(&self, service: &Service, peer: &PeerId) -> BTreeSet<ServiceDistance> {
        self.annotate_by(self.graph.successors(service), peer)
    }

    pub fn ancestors_by(&self, service: &Service, peer: &PeerId) -> BTreeSet<ServiceDistance> {
        self.annotate_by(self.graph.ancestors(service), peer)
    }

    pub fn local_successors(&self, service: &Service) -> BTreeSet<ServiceDistance> {
        self.graph
            .successors(service)
            .into_iter()
            .filter(|s| s.peer == self.local_peer)
            .map(ServiceDistance::local)
            .collect()
    }

    pub fn local_ancestors(&self, service: &Service) -> BTreeSet<ServiceDistance> {
        self.graph
            .ancestors(service)
            .into_iter()
            .filter(|s| s.peer == self.local_peer)
            .map(ServiceDistance::local)
            .collect()
    }

    /// Local services with a parameter subsumed by one of `parameters` of the
    /// same kind.
    pub fn find_local_compatible_services(&self, parameters: &BTreeSet<Parameter>) -> BTreeSet<Service> {
        self.local_services()
            .filter(|s| {
                parameters.iter().any(|p| {
                    s.parameters
                        .iter()
                        .any(|own| own.kind == p.kind && self.taxonomy.subsumes(&p.id, &own.id))
                })
            })
            .cloned()
            .collect()
    }

    pub fn local_services(&self) -> impl Iterator<Item = &Service> {
        self.graph.services().filter(|s| s.peer == self.local_peer)
    }

    pub fn remote_services(&self) -> impl Iterator<Item = &Service> {
        self.graph.services().filter(|s| s.peer != self.local_peer)
    }

    pub fn is_local(&self, service: &Service) -> bool {
        service.peer == self.local_peer && self.graph.contains(service)
    }

    pub fn contains(&self, service: &Service) -> bool {
        self.graph.contains(service)
    }

    /// Look up a service by its `name:peer` key.
    pub fn get_service(&self, key: &str) -> Option<&Service> {
        self.graph.get(key)
    }

    /// Collision peers through which services on `service.peer` were learned.
    pub fn through_collision_nodes(&self, service: &Service) -> BTreeSet<PeerId> {
        self.disclosures
            .iter()
            .filter(|(s, _)| s.peer == service.peer)
            .flat_map(|(_, by)| by.keys().cloned())
            .collect()
    }

    /// Indirect routes to `dest`, cheapest first.
    pub fn routes(&self, dest: &PeerId) -> Vec<IndirectRoute> {
        let mut best: BTreeMap<&PeerId, u32> = BTreeMap::new();
        for (service, by_peer) in &self.disclosures {
            if &service.peer != dest {
                continue;
            }
            for (through, d) in by_peer {
                let e = best.entry(through).or_insert(*d);
                *e = (*e).min(*d);
            }
        }
        let mut routes: Vec<IndirectRoute> = best
            .into_iter()
            .map(|(through, distance)| IndirectRoute {
                dest: dest.clone(),
                through: through.clone(),
                distance,
            })
            .collect();
        routes.sort_by(|a, b| a.distance.cmp(&b.distance).then(a.through.cmp(&b.through)));
        routes
    }
}

impl std::fmt::Debug for ServiceDependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDependencyGraph")
            .field("local_peer", &self.local_peer)
            .field("services", &self.graph.service_count())
            .field("connections", &self.graph.connection_count())
            .field("remote", &self.disclosures.len())
            .finish()
    }
}
