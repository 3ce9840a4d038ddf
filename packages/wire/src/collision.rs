//! Messages of the collision and graph-construction protocol.
//!
//! | Message | Sent by | Sent to |
//! |---------|---------|---------|
//! | [`CollisionMessage`] | detecting peer | every holder of a colliding parameter |
//! | [`CollisionResponseMessage`] | holder | detecting peer |
//! | [`ConnectServicesMessage`] | detecting peer | every peer with a paired service |
//! | [`DisconnectServicesMessage`] | detecting peer | peers it previously connected |
//! | [`InhibeCollisionsMessage`] | detecting peer | counterpart holders |
//! | [`RemovedServicesMessage`] | service owner | detecting peers |
//! | [`ForwardMessage`] | any peer | the next hop towards a destination |

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use svcompose::{Collision, DistanceTable, Inhibition, MessageId, PeerId, Service, ServiceDistance};

use crate::message::Message;

/// Asks a parameter holder which of its local services take part in
/// `collisions`. `route` identifies this round of the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionMessage {
    pub source: PeerId,
    pub route: MessageId,
    pub collisions: BTreeSet<Collision>,
}

impl CollisionMessage {
    pub fn new(source: PeerId, route: MessageId, collisions: BTreeSet<Collision>) -> Self {
        Self {
            source,
            route,
            collisions,
        }
    }
}

/// A holder's compatible local services, each at distance 0 from the holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionResponseMessage {
    pub source: PeerId,
    pub route: MessageId,
    pub collisions: BTreeSet<Collision>,
    pub services: BTreeSet<ServiceDistance>,
}

impl CollisionResponseMessage {
    pub fn new(
        source: PeerId,
        route: MessageId,
        collisions: BTreeSet<Collision>,
        services: BTreeSet<ServiceDistance>,
    ) -> Self {
        Self {
            source,
            route,
            collisions,
            services,
        }
    }

    /// Shift every service distance by the hops between the responder and
    /// the detecting peer.
    pub fn add_distance(&mut self, hops: u32) {
        self.services = std::mem::take(&mut self.services)
            .into_iter()
            .map(|sd| ServiceDistance::new(sd.service, sd.distance.saturating_add(hops)))
            .collect();
    }
}

/// Remote neighbours for the receiver's local services, disclosed by
/// `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectServicesMessage {
    pub source: PeerId,
    #[serde(with = "svcompose::types::entries")]
    pub successors: DistanceTable,
    #[serde(with = "svcompose::types::entries")]
    pub ancestors: DistanceTable,
}

impl ConnectServicesMessage {
    pub fn new(source: PeerId, successors: DistanceTable, ancestors: DistanceTable) -> Self {
        Self {
            source,
            successors,
            ancestors,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty() && self.ancestors.is_empty()
    }
}

/// Withdraws services previously disclosed by `source`.
///
/// With `services_were_removed` the services themselves are gone. Without
/// it only the route through `source` to their peers is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectServicesMessage {
    pub source: PeerId,
    pub services: BTreeSet<Service>,
    pub services_were_removed: bool,
}

impl DisconnectServicesMessage {
    pub fn new(source: PeerId, services: BTreeSet<Service>, services_were_removed: bool) -> Self {
        Self {
            source,
            services,
            services_were_removed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InhibeCollisionsMessage {
    pub source: PeerId,
    pub inhibitions: BTreeSet<Inhibition>,
}

impl InhibeCollisionsMessage {
    pub fn new(source: PeerId, inhibitions: BTreeSet<Inhibition>) -> Self {
        Self {
            source,
            inhibitions,
        }
    }
}

/// Tells detecting peers that local services of `source` were removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedServicesMessage {
    pub source: PeerId,
    pub services: BTreeSet<Service>,
}

impl RemovedServicesMessage {
    pub fn new(source: PeerId, services: BTreeSet<Service>) -> Self {
        Self { source, services }
    }
}

/// Relay envelope carrying `payload` towards the peers hosting
/// `destinations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardMessage {
    pub source: PeerId,
    pub destinations: BTreeSet<Service>,
    pub payload: Box<Message>,
}

impl ForwardMessage {
    pub fn new(source: PeerId, destinations: BTreeSet<Service>, payload: Message) -> Self {
        Self {
            source,
            destinations,
            payload: Box::new(payload),
        }
    }
}
