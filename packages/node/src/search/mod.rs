//! Composition search protocols.
//!
//! | Module | Protocol |
//! |--------|----------|
//! | [`forward`] | INIT floods towards GOAL, services continue once every input is covered |
//! | [`backward`] | GOAL floods towards INIT, split over covering sets and merged in message trees |
//! | [`bidirectional`] | both at once, meeting points notify the search owner |
//!
//! Every protocol is an `impl CompositionPeer` block; the state lives in the
//! peer's tables.

pub mod backward;
pub mod bidirectional;
pub mod forward;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use svcompose::composition::{is_goal, is_init, search_id_of};
use svcompose::{SearchId, Service, ServiceDistance};

/// Whether `candidate` may join a composition of `search` that already holds
/// `composition`.
///
/// Services are never visited twice, and endpoints only take part in their
/// own search.
pub(crate) fn may_join(search: &SearchId, composition: &BTreeSet<Service>, candidate: &Service) -> bool {
    if composition.contains(candidate) {
        return false;
    }
    if is_init(candidate) || is_goal(candidate) {
        return search_id_of(candidate).as_ref() == Some(search);
    }
    true
}

/// Neighbours grouped by distance, so each group travels in one message
/// with a single hop count.
pub(crate) fn by_distance(neighbours: &BTreeSet<ServiceDistance>) -> BTreeMap<u32, BTreeSet<Service>> {
    let mut groups: BTreeMap<u32, BTreeSet<Service>> = BTreeMap::new();
    for sd in neighbours {
        groups.entry(sd.distance).or_default().insert(sd.service.clone());
    }
    groups
}

pub(crate) fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
