//! Human-readable text rendering of services, compositions, and graphs.
//!
//! The output is stable plain text suitable for terminals and logs. It is
//! not a canonical format; only the wire encoding is normative.

use std::collections::{BTreeMap, BTreeSet};

use crate::collision::Collision;
use crate::composition::{is_goal, is_init};
use crate::graph::ServiceGraph;
use crate::ids::SearchId;
use crate::types::{PeerId, Service};

/// Render a service on one line.
///
/// ```text
/// Quote@p2  in: Product  out: Price, Currency
/// ```
pub fn render_service(service: &Service) -> String {
    let inputs: Vec<&str> = service.inputs().map(|p| p.id.as_str()).collect();
    let outputs: Vec<&str> = service.outputs().map(|p| p.id.as_str()).collect();
    let mut out = format!("{}@{}", service.name, service.peer);
    if !inputs.is_empty() {
        out.push_str(&format!("  in: {}", inputs.join(", ")));
    }
    if !outputs.is_empty() {
        out.push_str(&format!("  out: {}", outputs.join(", ")));
    }
    out
}

/// Render a found composition with INIT first and GOAL last.
///
/// ```text
/// Composition p1#1  3 services  4 hops
///   INIT  Trip-INIT-1@p1  out: City
///         Weather@p2  in: City  out: Forecast
///   GOAL  Trip-GOAL-1@p1  in: Forecast
/// ```
pub fn render_composition(search: &SearchId, services: &BTreeSet<Service>, hops: u32) -> String {
    let middle = services.len().saturating_sub(2);
    let mut out = format!(
        "Composition {}  {} service{}  {} hop{}\n",
        search,
        middle,
        if middle == 1 { "" } else { "s" },
        hops,
        if hops == 1 { "" } else { "s" },
    );

    let inits = services.iter().filter(|s| is_init(s));
    let plain = services.iter().filter(|s| !is_init(s) && !is_goal(s));
    let goals = services.iter().filter(|s| is_goal(s));
    for s in inits {
        out.push_str(&format!("  INIT  {}\n", render_service(s)));
    }
    for s in plain {
        out.push_str(&format!("        {}\n", render_service(s)));
    }
    for s in goals {
        out.push_str(&format!("  GOAL  {}\n", render_service(s)));
    }
    out
}

/// Render a [`ServiceGraph`] grouped by hosting peer.
///
/// ```text
/// Service Graph  3 services  2 connection points
/// ──────────────────────────────────────────────
///
/// p1 (2)
///   Quote@p1  in: Product  out: Price
///     → Pay@p1
/// ```
pub fn render_graph(graph: &ServiceGraph) -> String {
    let services = graph.service_count();
    let points = graph.connection_count();
    let header = format!(
        "Service Graph  {} service{}  {} connection point{}",
        services,
        if services == 1 { "" } else { "s" },
        points,
        if points == 1 { "" } else { "s" },
    );
    let rule = "─".repeat(header.chars().count());
    let mut out = format!("{header}\n{rule}\n");

    let mut by_peer: BTreeMap<&PeerId, Vec<&Service>> = BTreeMap::new();
    for s in graph.services() {
        by_peer.entry(&s.peer).or_default().push(s);
    }
    for (peer, group) in by_peer {
        out.push('\n');
        out.push_str(&format!("{} ({})\n", peer, group.len()));
        for s in group {
            out.push_str(&format!("  {}\n", render_service(s)));
            for succ in graph.successors(s) {
                out.push_str(&format!("    → {}@{}\n", succ.name, succ.peer));
            }
        }
    }
    out
}

/// Render detected collisions, one per line.
pub fn render_collisions(collisions: &BTreeSet<Collision>) -> String {
    if collisions.is_empty() {
        return "no collisions\n".to_string();
    }
    collisions
        .iter()
        .map(|c| format!("{}  ←  {}\n", c.input, c.output))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{create_goal, create_init};
    use crate::taxonomy::BasicTaxonomy;
    use crate::types::Parameter;

    fn target() -> Service {
        Service::new("Trip", PeerId::from("p1"))
            .with_inputs(["City"])
            .with_outputs(["Forecast"])
    }

    #[test]
    fn render_service_lists_parameters() {
        let s = Service::new("Quote", PeerId::from("p2"))
            .with_inputs(["Product"])
            .with_outputs(["Price"]);
        assert_eq!(render_service(&s), "Quote@p2  in: Product  out: Price");
        assert_eq!(render_service(&Service::new("Bare", PeerId::from("p2"))), "Bare@p2");
    }

    #[test]
    fn render_composition_orders_endpoints() {
        let search = SearchId::new(PeerId::from("p1"), 1);
        let weather = Service::new("Weather", PeerId::from("p2"))
            .with_inputs(["City"])
            .with_outputs(["Forecast"]);
        let services: BTreeSet<Service> = [
            weather,
            create_init(&target(), &search),
            create_goal(&target(), &search),
        ]
        .into_iter()
        .collect();

        let rendered = render_composition(&search, &services, 4);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Composition p1#1  1 service  4 hops");
        assert!(lines[1].starts_with("  INIT  Trip-INIT-1@p1"));
        assert!(lines[2].contains("Weather@p2"));
        assert!(lines[3].starts_with("  GOAL  Trip-GOAL-1@p1"));
    }

    #[test]
    fn render_graph_groups_by_peer() {
        let mut tax = BasicTaxonomy::new("Thing");
        tax.add("A", "Thing").unwrap();
        let producer = Service::new("P", PeerId::from("p1")).with_outputs(["A"]);
        let consumer = Service::new("C", PeerId::from("p2")).with_inputs(["A"]);
        let g = ServiceGraph::from_services([&producer, &consumer], &tax);
        let rendered = render_graph(&g);
        assert!(rendered.contains("2 services  1 connection point"));
        assert!(rendered.contains("p1 (1)"));
        assert!(rendered.contains("→ C@p2"));
    }

    #[test]
    fn render_collisions_lists_pairs() {
        let collisions: BTreeSet<Collision> =
            [Collision::new(Parameter::input("A"), Parameter::output("B"))]
                .into_iter()
                .collect();
        assert_eq!(render_collisions(&collisions), "I-A  ←  O-B\n");
        assert_eq!(render_collisions(&BTreeSet::new()), "no collisions\n");
    }
}
