//! Backward composition search.
//!
//! GOAL keeps a base [`BCompositionMessage`] and splits it once per covering
//! set of its inputs, one part per ancestor in the set. Every service that
//! receives a part does the same with its own covering sets. INIT has no
//! inputs, so parts stop there and are gathered into a [`MessageTree`] per
//! root; a complete tree means every branch of at least one alternative made
//! it back, and the services on those branches form a composition.
//!
//! [`MessageTree`]: svcompose::MessageTree

use std::collections::{BTreeMap, BTreeSet};

use svcompose::composition::{is_goal, is_init, search_id_of};
use svcompose::types::insert_min;
use svcompose::{
    covering_sets, CoveringSet, DistanceTable, MessageId, MessagePart, SearchId, Service,
    ServiceDistance,
};
use svcompose_wire::BCompositionMessage;
use tracing::{debug, info, trace};

use super::{as_millis, may_join};
use crate::peer::CompositionPeer;

impl CompositionPeer {
    pub(crate) fn start_backward(&self, search: &SearchId, goal: &Service) {
        let base = BCompositionMessage::new(
            self.peer_id().clone(),
            search.clone(),
            goal.clone(),
            [goal.clone()].into_iter().collect(),
            self.local.max_ttl(search),
            as_millis(self.local.remaining_time(search)),
            0,
            BTreeSet::new(),
            DistanceTable::new(),
            MessagePart::new(self.ids.next_message_id()),
        );
        self.backward.add_message(goal, base.clone());
        let sets = self.covering_sets_of(goal);
        debug!("backward: {search} starts at {goal} with {} covering sets", sets.len());
        self.split_backward(goal, &base, &sets);
    }

    /// Every covering set of `service` known so far, including the ones its
    /// current ancestors allow.
    fn covering_sets_of(&self, service: &Service) -> BTreeSet<CoveringSet> {
        let mut known = self.backward.covering_sets(service);
        let fresh = self.fresh_covering_sets(service, &known);
        known.extend(fresh);
        known
    }

    /// Covering sets of `service` that are not supersets of `known`. They
    /// are stored before being returned.
    fn fresh_covering_sets(&self, service: &Service, known: &BTreeSet<CoveringSet>) -> BTreeSet<CoveringSet> {
        let ancestors: BTreeSet<Service> = self
            .creator()
            .sdg()
            .ancestors(service)
            .into_iter()
            .map(|sd| sd.service)
            .collect();
        let fresh = covering_sets(service, &ancestors, known, self.taxonomy.as_ref());
        self.backward.add_covering_sets(service, &fresh);
        fresh
    }

    /// Split `message`, held by `service`, over each usable set in `sets`.
    fn split_backward(&self, service: &Service, message: &BCompositionMessage, sets: &BTreeSet<CoveringSet>) {
        let search = &message.search;
        // GOAL is the search's own hop and leaves with the full budget, as INIT does.
        let ttl = if is_goal(service) {
            message.ttl
        } else {
            message.ttl.saturating_sub(1)
        };
        if ttl == 0 {
            trace!("backward: {search} ran out of ttl at {service}");
            return;
        }
        let remaining = self.backward.remaining_time(search);
        if remaining.is_zero() || sets.is_empty() {
            return;
        }

        let mut composition = message.composition.clone();
        composition.insert(service.clone());
        let distances: BTreeMap<Service, u32> = self
            .creator()
            .sdg()
            .ancestors(service)
            .into_iter()
            .map(|sd| (sd.service, sd.distance))
            .collect();

        let mut outgoing = Vec::new();
        for set in sets {
            let usable = set
                .iter()
                .all(|a| distances.contains_key(a) && may_join(search, &composition, a));
            if !usable {
                continue;
            }
            let mut table = message.ancestor_distances.clone();
            let row = table.entry(service.clone()).or_default();
            for a in set {
                let d = distances.get(a).copied().unwrap_or_default();
                insert_min(row, ServiceDistance::new(a.clone(), d));
            }
            let parts = message.message_part.split(set.len(), &self.ids);
            for (part, ancestor) in parts.into_iter().zip(set) {
                let d = distances.get(ancestor).copied().unwrap_or_default();
                let destinations: BTreeSet<Service> = [ancestor.clone()].into_iter().collect();
                let m = BCompositionMessage::new(
                    self.peer_id().clone(),
                    search.clone(),
                    service.clone(),
                    destinations.clone(),
                    ttl,
                    as_millis(remaining),
                    message.hops.saturating_add(d),
                    composition.clone(),
                    table.clone(),
                    part,
                );
                outgoing.push((m.into(), destinations));
            }
        }
        self.dispatch(outgoing);
    }

    pub(crate) fn receive_backward(&self, m: BCompositionMessage) {
        for service in self.local_destinations(&m.dest_services) {
            let Some(complete) = self.backward.add_message(&service, m.clone()) else {
                trace!("backward: duplicate from {} at {service}", m.source_service);
                continue;
            };
            if is_init(&service) {
                if complete && search_id_of(&service).as_ref() == Some(&m.search) {
                    self.init_reached(&m.search, &service, &m.message_part.root);
                }
                continue;
            }
            if is_goal(&service) {
                continue;
            }
            let sets = self.covering_sets_of(&service);
            self.split_backward(&service, &m, &sets);
            if complete {
                self.check_meeting_point(&m.search, &service);
            }
        }
    }

    /// Report every complete alternative of the tree at INIT. Alternatives
    /// reported before are filtered by the search table.
    fn init_reached(&self, search: &SearchId, init: &Service, root: &MessageId) {
        for messages in self.backward.complete_alternatives(search, init, root) {
            let mut composition: BTreeSet<Service> = messages
                .iter()
                .flat_map(|m| m.composition.iter().cloned())
                .collect();
            composition.insert(init.clone());
            let hops = messages.iter().map(|m| m.hops).max().unwrap_or(0);
            self.report_found(search, &composition, hops);
        }
    }

    /// Split what `service` already holds over the covering sets its new
    /// ancestors make possible.
    pub(crate) fn backward_new_ancestors(&self, service: &Service) {
        let known = self.backward.covering_sets(service);
        let fresh = self.fresh_covering_sets(service, &known);
        if fresh.is_empty() {
            return;
        }
        for m in self.backward.messages(service) {
            self.split_backward(service, &m, &fresh);
        }
    }

    pub(crate) fn backward_lost_successors(&self, service: &Service, lost: &BTreeSet<Service>) {
        let owned = if is_init(service) && !self.config.search_mode.runs_forward() {
            search_id_of(service).filter(|s| self.local.is_running(s))
        } else {
            None
        };
        let before = owned
            .as_ref()
            .map_or(0, |s| self.backward.complete_trees(s, service).len());

        self.backward.remove_successor_messages(service, lost);

        if let Some(search) = owned {
            if before > 0 && self.backward.complete_trees(&search, service).is_empty() {
                info!("search: {search} compositions lost");
                self.listener.compositions_lost(&search, lost);
            }
        }
    }
}
