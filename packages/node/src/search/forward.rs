//! Forward composition search.
//!
//! INIT sends an [`FCompositionMessage`] to its successors. A service that
//! has every input covered by the outputs of the senders it heard from
//! continues the flood with `ttl - 1`, carrying the union of the received
//! compositions and distance tables. GOAL with all inputs covered means a
//! composition was found.
//!
//! When an ancestor disappears its messages are dropped and coverage is
//! recomputed. A service that lost coverage tells its successors with an
//! [`InvalidCompositionsMessage`]; one that is still covered sends a
//! [`CompositionModificationMessage`] back to the search owner.

use std::collections::BTreeSet;

use svcompose::composition::{is_goal, is_init, search_id_of};
use svcompose::types::{insert_min, merge_tables};
use svcompose::{DistanceTable, SearchId, Service, ServiceDistance, ShortestPathCalculator};
use svcompose_wire::{CompositionModificationMessage, FCompositionMessage, InvalidCompositionsMessage};
use tracing::{debug, info, trace, warn};

use super::{as_millis, by_distance, may_join};
use crate::peer::CompositionPeer;

impl CompositionPeer {
    pub(crate) fn start_forward(&self, search: &SearchId, init: &Service) {
        let successors = self.creator().sdg().successors(init);
        debug!("forward: {search} starts at {init} with {} successors", successors.len());
        self.propagate_forward(search, init, &successors);
    }

    /// Send the composition gathered at `service` on to `successors`.
    ///
    /// INIT starts from scratch with the full TTL; other services merge what
    /// they received.
    fn propagate_forward(&self, search: &SearchId, service: &Service, successors: &BTreeSet<ServiceDistance>) {
        let (ttl, hops, mut composition, mut table, remaining) = if is_init(service) {
            (
                self.local.max_ttl(search),
                0,
                BTreeSet::new(),
                DistanceTable::new(),
                self.local.remaining_time(search),
            )
        } else {
            let received = self.forward.messages(search, service);
            let Some(ttl) = received.iter().map(|m| m.ttl).max() else {
                return;
            };
            let hops = received.iter().map(|m| m.hops).max().unwrap_or(0);
            let mut composition = BTreeSet::new();
            let mut table = DistanceTable::new();
            for m in &received {
                composition.extend(m.composition.iter().cloned());
                merge_tables(&mut table, &m.successor_distances);
            }
            (
                ttl.saturating_sub(1),
                hops,
                composition,
                table,
                self.forward.remaining_time(search),
            )
        };
        if ttl == 0 {
            trace!("forward: {search} ran out of ttl at {service}");
            return;
        }
        if remaining.is_zero() {
            return;
        }

        composition.insert(service.clone());
        let targets: BTreeSet<ServiceDistance> = successors
            .iter()
            .filter(|sd| may_join(search, &composition, &sd.service))
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }
        let row = table.entry(service.clone()).or_default();
        for sd in &targets {
            insert_min(row, sd.clone());
        }

        let outgoing = by_distance(&targets)
            .into_iter()
            .map(|(distance, destinations)| {
                let message = FCompositionMessage::new(
                    self.peer_id().clone(),
                    search.clone(),
                    service.clone(),
                    destinations.clone(),
                    ttl,
                    as_millis(remaining),
                    hops.saturating_add(distance),
                    composition.clone(),
                    table.clone(),
                );
                (message.into(), destinations)
            })
            .collect();
        self.dispatch(outgoing);
    }

    pub(crate) fn receive_forward(&self, m: FCompositionMessage) {
        for service in self.local_destinations(&m.dest_services) {
            if !self.forward.add_message(&service, m.clone()) {
                trace!("forward: duplicate from {} at {service}", m.source_service);
                continue;
            }
            if !self.forward.are_all_inputs_covered(&m.search, &service) {
                continue;
            }
            if is_goal(&service) {
                if search_id_of(&service).as_ref() == Some(&m.search) {
                    self.goal_covered(&m.search, &service);
                }
                continue;
            }
            let successors = self.creator().sdg().successors(&service);
            self.propagate_forward(&m.search, &service, &successors);
            self.check_meeting_point(&m.search, &service);
        }
    }

    fn goal_covered(&self, search: &SearchId, goal: &Service) {
        let received = self.forward.messages(search, goal);
        let mut composition: BTreeSet<Service> = received
            .iter()
            .flat_map(|m| m.composition.iter().cloned())
            .collect();
        composition.insert(goal.clone());
        let hops = received.iter().map(|m| m.hops).max().unwrap_or(0);
        self.report_found(search, &composition, hops);
    }

    /// New successors of a service that already forwarded a search get the
    /// same composition.
    pub(crate) fn forward_new_successors(&self, service: &Service, successors: &BTreeSet<ServiceDistance>) {
        if is_init(service) {
            if let Some(search) = search_id_of(service) {
                if self.local.is_running(&search) {
                    self.propagate_forward(&search, service, successors);
                }
            }
            return;
        }
        for search in self.forward.searches_with(service) {
            if self.forward.are_all_inputs_covered(&search, service) {
                self.propagate_forward(&search, service, successors);
            }
        }
    }

    pub(crate) fn forward_lost_ancestors(&self, service: &Service, lost: &BTreeSet<Service>) {
        for search in self.forward.searches_with(service) {
            self.ancestors_gone(&search, service, lost, lost);
        }
    }

    pub(crate) fn receive_invalid(&self, m: InvalidCompositionsMessage) {
        let gone: BTreeSet<Service> = [m.source_service.clone()].into_iter().collect();
        for service in self.local_destinations(&m.dest_services) {
            self.ancestors_gone(&m.search, &service, &gone, &m.invalid_services);
        }
    }

    /// Drop what `service` received from `lost` in `search` and react to the
    /// change in coverage. `invalid` names the services reported as gone.
    fn ancestors_gone(
        &self,
        search: &SearchId,
        service: &Service,
        lost: &BTreeSet<Service>,
        invalid: &BTreeSet<Service>,
    ) {
        let senders: BTreeSet<Service> = self
            .forward
            .messages(search, service)
            .into_iter()
            .map(|m| m.source_service)
            .collect();
        let removed: BTreeSet<Service> = lost.intersection(&senders).cloned().collect();
        if removed.is_empty() {
            return;
        }
        let Some((was, now)) = self.forward.remove_ancestor_messages(search, service, &removed) else {
            return;
        };
        if !was {
            return;
        }
        debug!("forward: {search} lost {} ancestors of {service}, covered: {now}", removed.len());

        if is_goal(service) {
            if search_id_of(service).as_ref() != Some(search) || !self.local.is_running(search) {
                return;
            }
            if now {
                info!("search: {search} composition modified");
                self.listener.composition_modified(search, invalid);
            } else {
                info!("search: {search} compositions lost");
                self.listener.compositions_lost(search, invalid);
            }
            return;
        }

        if !now {
            let mut invalid = invalid.clone();
            invalid.insert(service.clone());
            let successors: BTreeSet<Service> = self
                .creator()
                .sdg()
                .successors(service)
                .into_iter()
                .map(|sd| sd.service)
                .filter(|s| may_join(search, &BTreeSet::new(), s))
                .collect();
            if successors.is_empty() {
                return;
            }
            let message = InvalidCompositionsMessage::new(
                self.peer_id().clone(),
                search.clone(),
                service.clone(),
                successors.clone(),
                invalid,
            );
            self.dispatch(vec![(message.into(), successors)]);
            return;
        }

        let mut table = DistanceTable::new();
        for m in self.forward.messages(search, service) {
            merge_tables(&mut table, &m.successor_distances);
        }
        let Some(path) = ShortestPathCalculator::from_successors(&table).calculate(service) else {
            warn!("forward: no path from {service} back to the owner of {search}");
            return;
        };
        let message = CompositionModificationMessage::new(
            self.peer_id().clone(),
            search.clone(),
            path.path,
            invalid.clone(),
        );
        if let Some(arrived) = self.route_along_path(message) {
            self.accept_modification(arrived);
        }
    }
}
