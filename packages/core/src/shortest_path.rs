//! Shortest INIT→service / service→GOAL paths over a search's distance
//! table.
//!
//! The table is turned into a weighted directed graph whose edges run from
//! producer to consumer. For a service `s` the calculator finds both the
//! cheapest `INIT → s` path and the cheapest `s → GOAL` path and keeps the
//! cheaper one, reversing the INIT path so that every returned path starts at
//! `s`. On equal cost the GOAL-bound path wins.

use std::collections::BTreeMap;

use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::composition::{is_goal, is_init};
use crate::types::{table_services, DistanceTable, Service};

/// A path starting at the service it was computed for and ending at INIT or
/// GOAL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortestPath {
    pub path: Vec<Service>,
    pub cost: u32,
}

impl ShortestPath {
    pub fn start(&self) -> Option<&Service> {
        self.path.first()
    }

    /// The endpoint the path leads to.
    pub fn destination(&self) -> Option<&Service> {
        self.path.last()
    }
}

#[derive(Debug)]
pub struct ShortestPathCalculator {
    graph: DiGraph<Service, u32>,
    index: BTreeMap<Service, NodeIndex>,
    init: Option<NodeIndex>,
    goal: Option<NodeIndex>,
}

impl ShortestPathCalculator {
    /// Build from tables mapping a service to its successors and from tables
    /// mapping a service to its ancestors. Either may be empty.
    pub fn new(successors: &DistanceTable, ancestors: &DistanceTable) -> Self {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        let mut services = table_services(successors);
        services.extend(table_services(ancestors));
        for s in services {
            let idx = graph.add_node(s.clone());
            index.insert(s, idx);
        }

        let mut weights: BTreeMap<(NodeIndex, NodeIndex), u32> = BTreeMap::new();
        let mut edge = |from: &Service, to: &Service, w: u32| {
            if let (Some(&a), Some(&b)) = (index.get(from), index.get(to)) {
                if a != b {
                    let e = weights.entry((a, b)).or_insert(w);
                    *e = (*e).min(w);
                }
            }
        };
        for (service, row) in successors {
            for sd in row {
                edge(service, &sd.service, sd.distance);
            }
        }
        for (service, row) in ancestors {
            for sd in row {
                edge(&sd.service, service, sd.distance);
            }
        }
        for ((a, b), w) in weights {
            graph.add_edge(a, b, w);
        }

        let init = index.iter().find(|(s, _)| is_init(s)).map(|(_, i)| *i);
        let goal = index.iter().find(|(s, _)| is_goal(s)).map(|(_, i)| *i);
        Self {
            graph,
            index,
            init,
            goal,
        }
    }

    pub fn from_successors(table: &DistanceTable) -> Self {
        Self::new(table, &DistanceTable::new())
    }

    pub fn from_ancestors(table: &DistanceTable) -> Self {
        Self::new(&DistanceTable::new(), table)
    }

    pub fn init(&self) -> Option<&Service> {
        self.init.map(|i| &self.graph[i])
    }

    pub fn goal(&self) -> Option<&Service> {
        self.goal.map(|i| &self.graph[i])
    }

    pub fn contains(&self, service: &Service) -> bool {
        self.index.contains_key(service)
    }

    /// Weight of the edge between `a` and `b` in either direction.
    pub fn distance_between(&self, a: &Service, b: &Service) -> Option<u32> {
        let (&ia, &ib) = (self.index.get(a)?, self.index.get(b)?);
        self.graph
            .find_edge(ia, ib)
            .or_else(|| self.graph.find_edge(ib, ia))
            .map(|e| self.graph[e])
    }

    /// Sum of edge weights along `path`, `None` if two consecutive services
    /// are not adjacent.
    pub fn path_distance(&self, path: &[Service]) -> Option<u32> {
        path.windows(2)
            .map(|w| self.distance_between(&w[0], &w[1]))
            .sum()
    }

    /// `[service, …, INIT]`.
    pub fn path_to_init(&self, service: &Service) -> Option<ShortestPath> {
        let from = self.init?;
        let to = *self.index.get(service)?;
        let mut found = self.cheapest(from, to)?;
        found.path.reverse();
        Some(found)
    }

    /// `[service, …, GOAL]`.
    pub fn path_to_goal(&self, service: &Service) -> Option<ShortestPath> {
        let from = *self.index.get(service)?;
        let to = self.goal?;
        self.cheapest(from, to)
    }

    /// The canonical path for `service`: the cheaper of the two directions,
    /// GOAL-bound on a tie.
    pub fn calculate(&self, service: &Service) -> Option<ShortestPath> {
        match (self.path_to_init(service), self.path_to_goal(service)) {
            (Some(direct), Some(inverse)) => {
                if direct.cost < inverse.cost {
                    Some(direct)
                } else {
                    Some(inverse)
                }
            }
            (direct, inverse) => inverse.or(direct),
        }
    }

    /// The cheapest canonical path over `candidates`; ties go to the lowest
    /// service in `(name, peer)` order.
    pub fn best_path<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a Service>,
    ) -> Option<ShortestPath> {
        candidates
            .into_iter()
            .filter_map(|s| self.calculate(s).map(|p| (p.cost, s, p)))
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .map(|(_, _, p)| p)
    }

    fn cheapest(&self, from: NodeIndex, to: NodeIndex) -> Option<ShortestPath> {
        let (cost, nodes) = astar(&self.graph, from, |n| n == to, |e| *e.weight(), |_| 0)?;
        Some(ShortestPath {
            path: nodes.into_iter().map(|n| self.graph[n].clone()).collect(),
            cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{create_goal, create_init};
    use crate::ids::SearchId;
    use crate::types::{PeerId, ServiceDistance};

    struct Fixture {
        init: Service,
        goal: Service,
        a: Service,
        b: Service,
        c: Service,
    }

    fn fixture() -> Fixture {
        let target = Service::new("T", PeerId::from("p1"));
        let search = SearchId::new(PeerId::from("p1"), 1);
        Fixture {
            init: create_init(&target, &search),
            goal: create_goal(&target, &search),
            a: Service::new("A", PeerId::from("p2")),
            b: Service::new("B", PeerId::from("p3")),
            c: Service::new("C", PeerId::from("p4")),
        }
    }

    fn row(table: &mut DistanceTable, from: &Service, to: &Service, d: u32) {
        table
            .entry(from.clone())
            .or_default()
            .insert(ServiceDistance::new(to.clone(), d));
    }

    /// INIT -1-> A -1-> B -5-> GOAL, and INIT -4-> C -1-> GOAL.
    fn successors(f: &Fixture) -> DistanceTable {
        let mut t = DistanceTable::new();
        row(&mut t, &f.init, &f.a, 1);
        row(&mut t, &f.a, &f.b, 1);
        row(&mut t, &f.b, &f.goal, 5);
        row(&mut t, &f.init, &f.c, 4);
        row(&mut t, &f.c, &f.goal, 1);
        t
    }

    #[test]
    fn picks_the_cheaper_direction() {
        let f = fixture();
        let calc = ShortestPathCalculator::from_successors(&successors(&f));
        assert_eq!(calc.init(), Some(&f.init));
        assert_eq!(calc.goal(), Some(&f.goal));

        let for_b = calc.calculate(&f.b).unwrap();
        assert_eq!(for_b.path, vec![f.b.clone(), f.a.clone(), f.init.clone()]);
        assert_eq!(for_b.cost, 2);
        assert_eq!(for_b.destination(), Some(&f.init));

        let for_c = calc.calculate(&f.c).unwrap();
        assert_eq!(for_c.path, vec![f.c.clone(), f.goal.clone()]);
        assert_eq!(for_c.cost, 1);
    }

    #[test]
    fn ties_go_to_goal() {
        let f = fixture();
        let mut t = DistanceTable::new();
        row(&mut t, &f.init, &f.a, 2);
        row(&mut t, &f.a, &f.goal, 2);
        let calc = ShortestPathCalculator::from_successors(&t);
        let p = calc.calculate(&f.a).unwrap();
        assert_eq!(p.destination(), Some(&f.goal));
    }

    #[test]
    fn ancestor_tables_give_the_same_graph() {
        let f = fixture();
        let mut t = DistanceTable::new();
        row(&mut t, &f.a, &f.init, 1);
        row(&mut t, &f.b, &f.a, 1);
        row(&mut t, &f.goal, &f.b, 5);
        let calc = ShortestPathCalculator::from_ancestors(&t);
        assert_eq!(calc.calculate(&f.b).unwrap().cost, 2);
        assert_eq!(calc.distance_between(&f.goal, &f.b), Some(5));
        assert_eq!(
            calc.path_distance(&[f.b.clone(), f.a.clone(), f.init.clone()]),
            Some(2)
        );
        assert_eq!(calc.path_distance(&[f.b.clone(), f.init.clone()]), None);
    }

    #[test]
    fn best_path_breaks_ties_by_service() {
        let f = fixture();
        let calc = ShortestPathCalculator::from_successors(&successors(&f));
        let best = calc.best_path([&f.c, &f.a]).unwrap();
        // A reaches INIT at 1 and C reaches GOAL at 1; A sorts first.
        assert_eq!(best.start(), Some(&f.a));
    }

    #[test]
    fn several_cheap_hops_beat_one_heavy_edge() {
        let f = fixture();
        let mut t = DistanceTable::new();
        row(&mut t, &f.init, &f.a, 1);
        row(&mut t, &f.a, &f.goal, 9);
        row(&mut t, &f.a, &f.b, 1);
        row(&mut t, &f.b, &f.c, 1);
        row(&mut t, &f.c, &f.goal, 1);
        let calc = ShortestPathCalculator::from_successors(&t);
        let p = calc.path_to_goal(&f.a).unwrap();
        assert_eq!(p.path, vec![f.a.clone(), f.b.clone(), f.c.clone(), f.goal.clone()]);
        assert_eq!(p.cost, 3);
        assert_eq!(calc.path_to_init(&f.c).unwrap().cost, 3);
    }

    #[test]
    fn missing_endpoints_yield_nothing() {
        let f = fixture();
        let mut t = DistanceTable::new();
        row(&mut t, &f.a, &f.b, 1);
        let calc = ShortestPathCalculator::from_successors(&t);
        assert!(calc.calculate(&f.a).is_none());
        assert!(calc.calculate(&f.goal).is_none());
    }
}
