//! Bidirectional search: forward and backward floods meeting halfway.
//!
//! A service is a meeting point for a search when its inputs are covered by
//! forward messages and it holds a complete backward message tree. The two
//! halves are joined there and a [`CompositionNotificationMessage`] travels
//! along the shortest path to INIT or GOAL, both hosted by the search owner.

use std::collections::BTreeSet;

use svcompose::composition::{is_goal, is_init, search_id_of};
use svcompose::types::{insert_min, merge_tables};
use svcompose::{DistanceTable, SearchId, Service, ServiceDistance, ShortestPathCalculator};
use svcompose_wire::{CompositionModificationMessage, CompositionNotificationMessage};
use tracing::{debug, info, warn};

use crate::config::SearchMode;
use crate::peer::CompositionPeer;

/// Turn `service → ancestors` rows into `ancestor → successors` rows.
fn invert(ancestors: &DistanceTable) -> DistanceTable {
    let mut successors = DistanceTable::new();
    for (service, row) in ancestors {
        for sd in row {
            insert_min(
                successors.entry(sd.service.clone()).or_default(),
                ServiceDistance::new(service.clone(), sd.distance),
            );
        }
    }
    successors
}

impl CompositionPeer {
    pub(crate) fn check_meeting_point(&self, search: &SearchId, service: &Service) {
        if self.config.search_mode != SearchMode::Bidirectional || is_init(service) || is_goal(service) {
            return;
        }
        if !self.forward.are_all_inputs_covered(search, service) {
            return;
        }
        let trees = self.backward.complete_trees(search, service);
        if trees.is_empty() {
            return;
        }

        let received = self.forward.messages(search, service);
        let forward_hops = received.iter().map(|m| m.hops).max().unwrap_or(0);
        let mut forward_composition = BTreeSet::new();
        let mut successors = DistanceTable::new();
        for m in &received {
            forward_composition.extend(m.composition.iter().cloned());
            merge_tables(&mut successors, &m.successor_distances);
        }

        for tree in trees {
            let mut composition = forward_composition.clone();
            let mut ancestors = DistanceTable::new();
            for m in &tree {
                composition.extend(m.composition.iter().cloned());
                merge_tables(&mut ancestors, &m.ancestor_distances);
            }
            composition.insert(service.clone());

            {
                let mut notified = self.notified.lock().unwrap_or_else(|p| p.into_inner());
                if !notified.insert((search.clone(), composition.clone())) {
                    continue;
                }
            }

            let backward_hops = tree.iter().map(|m| m.hops).max().unwrap_or(0);
            let Some(path) = ShortestPathCalculator::new(&successors, &ancestors).calculate(service) else {
                warn!("backward: no path from meeting point {service} to the owner of {search}");
                continue;
            };
            debug!("backward: {search} met at {service}, notifying along {} services", path.path.len());

            let mut table = successors.clone();
            merge_tables(&mut table, &invert(&ancestors));
            let message = CompositionNotificationMessage::new(
                self.peer_id().clone(),
                search.clone(),
                path.path,
                composition,
                table,
                forward_hops.saturating_add(backward_hops),
            );
            if let Some(arrived) = self.route_along_path(message) {
                self.accept_notification(arrived);
            }
        }
    }

    /// Endpoint of a path message, if it is INIT or GOAL of a search running
    /// here.
    fn owned_endpoint(&self, search: &SearchId, path: &[Service]) -> bool {
        match path.last() {
            Some(endpoint) => {
                (is_init(endpoint) || is_goal(endpoint))
                    && search_id_of(endpoint).as_ref() == Some(search)
                    && self.local.is_running(search)
            }
            None => false,
        }
    }

    pub(crate) fn accept_notification(&self, m: CompositionNotificationMessage) {
        if self.owned_endpoint(&m.search, &m.path) {
            self.report_found(&m.search, &m.composition, m.hops);
        }
    }

    pub(crate) fn accept_modification(&self, m: CompositionModificationMessage) {
        if self.owned_endpoint(&m.search, &m.path) {
            info!("search: {} composition modified", m.search);
            self.listener.composition_modified(&m.search, &m.removed_services);
        }
    }
}
