//! INIT and GOAL pseudo-services.
//!
//! A search for a target service is bracketed by two synthesized services
//! owned by the searching peer:
//!
//! - INIT, named `<target>-INIT-<n>`, outputs every input of the target;
//! - GOAL, named `<target>-GOAL-<n>`, consumes every output of the target.
//!
//! `<n>` is the local counter of the [`SearchId`]. Names are parsed from the
//! right, so target names may themselves contain dashes.

use crate::ids::SearchId;
use crate::types::{Parameter, Service};

const INIT_TAG: &str = "INIT";
const GOAL_TAG: &str = "GOAL";

fn synthesize(target: &Service, search: &SearchId, tag: &str) -> Service {
    let mut service = Service::new(
        format!("{}-{}-{}", target.name, tag, search.id),
        search.peer.clone(),
    );
    for p in &target.parameters {
        let mirrored = match (tag, p.is_input()) {
            (INIT_TAG, true) => Some(Parameter::output(p.id.clone())),
            (GOAL_TAG, false) => Some(Parameter::input(p.id.clone())),
            _ => None,
        };
        if let Some(m) = mirrored {
            service.parameters.insert(m);
        }
    }
    service
}

/// Synthesize the INIT service of `search`.
pub fn create_init(target: &Service, search: &SearchId) -> Service {
    synthesize(target, search, INIT_TAG)
}

/// Synthesize the GOAL service of `search`.
pub fn create_goal(target: &Service, search: &SearchId) -> Service {
    synthesize(target, search, GOAL_TAG)
}

/// Splits `<original>-<tag>-<n>` into its three parts.
fn parse(name: &str) -> Option<(&str, &str, u64)> {
    let mut it = name.rsplitn(3, '-');
    let n = it.next()?.parse().ok()?;
    let tag = it.next()?;
    let original = it.next()?;
    if original.is_empty() {
        return None;
    }
    Some((original, tag, n))
}

pub fn is_init(service: &Service) -> bool {
    matches!(parse(&service.name), Some((_, INIT_TAG, _)))
}

pub fn is_goal(service: &Service) -> bool {
    matches!(parse(&service.name), Some((_, GOAL_TAG, _)))
}

/// The target name an INIT or GOAL service was derived from.
pub fn original_name(service: &Service) -> Option<&str> {
    match parse(&service.name) {
        Some((original, INIT_TAG | GOAL_TAG, _)) => Some(original),
        _ => None,
    }
}

/// The search an INIT or GOAL service belongs to.
pub fn search_id_of(service: &Service) -> Option<SearchId> {
    match parse(&service.name) {
        Some((_, INIT_TAG | GOAL_TAG, n)) => Some(SearchId::new(service.peer.clone(), n)),
        _ => None,
    }
}

/// True when `init` and `goal` bracket the same search.
pub fn connected(init: &Service, goal: &Service) -> bool {
    if !is_init(init) || !is_goal(goal) || init.peer != goal.peer {
        return false;
    }
    original_name(init) == original_name(goal) && search_id_of(init) == search_id_of(goal)
}

/// The INIT and GOAL services found in `services`, if both are present and
/// belong to the same search.
pub fn find_endpoints<'a>(
    services: impl IntoIterator<Item = &'a Service>,
) -> Option<(&'a Service, &'a Service)> {
    let mut init = None;
    let mut goal = None;
    for s in services {
        if is_init(s) {
            init = Some(s);
        } else if is_goal(s) {
            goal = Some(s);
        }
    }
    match (init, goal) {
        (Some(i), Some(g)) if connected(i, g) => Some((i, g)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;

    fn target() -> Service {
        Service::new("Book-Trip", PeerId::from("p1"))
            .with_inputs(["City", "Date"])
            .with_outputs(["Ticket"])
    }

    #[test]
    fn init_and_goal_mirror_the_target() {
        let search = SearchId::new(PeerId::from("p1"), 7);
        let init = create_init(&target(), &search);
        let goal = create_goal(&target(), &search);

        assert_eq!(init.name, "Book-Trip-INIT-7");
        assert_eq!(goal.name, "Book-Trip-GOAL-7");
        assert_eq!(init.outputs().count(), 2);
        assert_eq!(init.inputs().count(), 0);
        assert!(goal.parameters.contains(&Parameter::input("Ticket")));
        assert_eq!(goal.parameters.len(), 1);
    }

    #[test]
    fn names_parse_from_the_right() {
        let search = SearchId::new(PeerId::from("p1"), 12);
        let init = create_init(&target(), &search);
        assert!(is_init(&init));
        assert!(!is_goal(&init));
        assert_eq!(original_name(&init), Some("Book-Trip"));
        assert_eq!(search_id_of(&init), Some(search));

        let plain = Service::new("Quote", PeerId::from("p1"));
        assert!(!is_init(&plain));
        assert_eq!(search_id_of(&plain), None);
        assert!(!is_init(&Service::new("X-INIT-abc", PeerId::from("p1"))));
        assert!(!is_init(&Service::new("-INIT-3", PeerId::from("p1"))));
    }

    #[test]
    fn connected_requires_same_search() {
        let s1 = SearchId::new(PeerId::from("p1"), 1);
        let s2 = SearchId::new(PeerId::from("p1"), 2);
        let init = create_init(&target(), &s1);
        assert!(connected(&init, &create_goal(&target(), &s1)));
        assert!(!connected(&init, &create_goal(&target(), &s2)));

        let other_peer = SearchId::new(PeerId::from("p2"), 1);
        assert!(!connected(&init, &create_goal(&target(), &other_peer)));

        let other = Service::new("Rent-Car", PeerId::from("p1"));
        assert!(!connected(&init, &create_goal(&other, &s1)));
        assert!(!connected(&create_goal(&target(), &s1), &init));
    }

    #[test]
    fn endpoints_are_found_in_a_composition() {
        let s = SearchId::new(PeerId::from("p1"), 3);
        let init = create_init(&target(), &s);
        let goal = create_goal(&target(), &s);
        let middle = Service::new("Planner", PeerId::from("p2"));
        let services = vec![middle, goal.clone(), init.clone()];
        let (i, g) = find_endpoints(&services).unwrap();
        assert_eq!(i, &init);
        assert_eq!(g, &goal);
        assert!(find_endpoints(&services[..2]).is_none());
    }
}
