//! Messages of the composition search protocols.
//!
//! Forward and backward messages flood the service graph between services;
//! notification and modification messages travel along a precomputed path
//! of services towards the search owner.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use svcompose::{DistanceTable, MessagePart, Partitioned, PeerId, SearchId, Service};

/// Forward search step from `source_service` to `dest_services`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FCompositionMessage {
    pub source: PeerId,
    pub search: SearchId,
    pub source_service: Service,
    pub dest_services: BTreeSet<Service>,
    pub ttl: u32,
    pub remaining_time_ms: u64,
    pub hops: u32,
    pub composition: BTreeSet<Service>,
    /// Service → successors with distances, for every hop taken so far.
    #[serde(with = "svcompose::types::entries")]
    pub successor_distances: DistanceTable,
}

impl FCompositionMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: PeerId,
        search: SearchId,
        source_service: Service,
        dest_services: BTreeSet<Service>,
        ttl: u32,
        remaining_time_ms: u64,
        hops: u32,
        composition: BTreeSet<Service>,
        successor_distances: DistanceTable,
    ) -> Self {
        Self {
            source,
            search,
            source_service,
            dest_services,
            ttl,
            remaining_time_ms,
            hops,
            composition,
            successor_distances,
        }
    }
}

/// Backward search step from `source_service` to `dest_services`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BCompositionMessage {
    pub source: PeerId,
    pub search: SearchId,
    pub source_service: Service,
    pub dest_services: BTreeSet<Service>,
    pub ttl: u32,
    pub remaining_time_ms: u64,
    pub hops: u32,
    pub composition: BTreeSet<Service>,
    /// Service → ancestors with distances, for every hop taken so far.
    #[serde(with = "svcompose::types::entries")]
    pub ancestor_distances: DistanceTable,
    pub message_part: MessagePart,
}

impl BCompositionMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: PeerId,
        search: SearchId,
        source_service: Service,
        dest_services: BTreeSet<Service>,
        ttl: u32,
        remaining_time_ms: u64,
        hops: u32,
        composition: BTreeSet<Service>,
        ancestor_distances: DistanceTable,
        message_part: MessagePart,
    ) -> Self {
        Self {
            source,
            search,
            source_service,
            dest_services,
            ttl,
            remaining_time_ms,
            hops,
            composition,
            ancestor_distances,
            message_part,
        }
    }
}

impl Partitioned for BCompositionMessage {
    fn message_part(&self) -> &MessagePart {
        &self.message_part
    }
}

/// Tells successors that `invalid_services` no longer have their inputs
/// covered in the forward search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidCompositionsMessage {
    pub source: PeerId,
    pub search: SearchId,
    pub source_service: Service,
    pub dest_services: BTreeSet<Service>,
    pub invalid_services: BTreeSet<Service>,
}

impl InvalidCompositionsMessage {
    pub fn new(
        source: PeerId,
        search: SearchId,
        source_service: Service,
        dest_services: BTreeSet<Service>,
        invalid_services: BTreeSet<Service>,
    ) -> Self {
        Self {
            source,
            search,
            source_service,
            dest_services,
            invalid_services,
        }
    }
}

/// Something routed hop by hop along a list of services.
///
/// The head of `path` is the service currently holding the message; the
/// last element is the destination.
pub trait PathMessage {
    fn path(&self) -> &[Service];
    fn set_path(&mut self, path: Vec<Service>);
}

/// A complete composition travelling back to the search owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionNotificationMessage {
    pub source: PeerId,
    pub search: SearchId,
    pub path: Vec<Service>,
    pub composition: BTreeSet<Service>,
    #[serde(with = "svcompose::types::entries")]
    pub successor_distances: DistanceTable,
    pub hops: u32,
}

impl CompositionNotificationMessage {
    pub fn new(
        source: PeerId,
        search: SearchId,
        path: Vec<Service>,
        composition: BTreeSet<Service>,
        successor_distances: DistanceTable,
        hops: u32,
    ) -> Self {
        Self {
            source,
            search,
            path,
            composition,
            successor_distances,
            hops,
        }
    }
}

impl PathMessage for CompositionNotificationMessage {
    fn path(&self) -> &[Service] {
        &self.path
    }

    fn set_path(&mut self, path: Vec<Service>) {
        self.path = path;
    }
}

/// Services that left a still-valid composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionModificationMessage {
    pub source: PeerId,
    pub search: SearchId,
    pub path: Vec<Service>,
    pub removed_services: BTreeSet<Service>,
}

impl CompositionModificationMessage {
    pub fn new(
        source: PeerId,
        search: SearchId,
        path: Vec<Service>,
        removed_services: BTreeSet<Service>,
    ) -> Self {
        Self {
            source,
            search,
            path,
            removed_services,
        }
    }
}

impl PathMessage for CompositionModificationMessage {
    fn path(&self) -> &[Service] {
        &self.path
    }

    fn set_path(&mut self, path: Vec<Service>) {
        self.path = path;
    }
}
