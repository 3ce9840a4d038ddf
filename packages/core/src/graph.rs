use std::collections::{BTreeMap, BTreeSet};

use crate::taxonomy::Taxonomy;
use crate::types::{Parameter, Service};

/// An AND node: a service, with the keys of the connection points that feed
/// its inputs and that its outputs feed.
#[derive(Debug, Clone)]
pub struct ServiceNode {
    pub service: Service,
    /// Connection points supplying this service's inputs.
    pub incoming: BTreeSet<String>,
    /// Connection points fed by this service's outputs.
    pub outgoing: BTreeSet<String>,
}

/// An OR node: "this input is satisfiable by this output".
///
/// Satisfied when any producer is present.
#[derive(Debug, Clone)]
pub struct ConnectionNode {
    pub output: Parameter,
    pub input: Parameter,
    pub producers: BTreeSet<String>,
    pub consumers: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Service(ServiceNode),
    Connection(ConnectionNode),
}

/// Stable key of the connection point joining `output` to `input`.
pub fn connection_key(output: &Parameter, input: &Parameter) -> String {
    format!("{output}->{input}")
}

/// A bipartite AND-OR graph of services and connection points.
///
/// Nodes live in an arena keyed by stable strings (`name:peer` for
/// services, `O-x->I-y` for connection points) and refer to each other by
/// key only. Edges are derived from taxonomy subsumption: an output `o`
/// feeds an input `i` when `subsumes(i, o)`.
///
/// A connection point exists only while it has at least one producer and
/// one consumer; removing a service garbage-collects the points it leaves
/// dangling.
#[derive(Debug, Clone, Default)]
pub struct ServiceGraph {
    nodes: BTreeMap<String, Node>,
}

impl ServiceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a set of services.
    pub fn from_services<'a>(
        services: impl IntoIterator<Item = &'a Service>,
        taxonomy: &dyn Taxonomy,
    ) -> Self {
        let mut g = Self::new();
        for s in services {
            g.merge(s, taxonomy);
        }
        g
    }

    /// Add a service and wire it to every compatible service already present.
    ///
    /// Returns `false` if a service with the same identity is already in the
    /// graph; the existing node is left untouched.
    pub fn merge(&mut self, service: &Service, taxonomy: &dyn Taxonomy) -> bool {
        let key = service.key();
        if self.nodes.contains_key(&key) {
            return false;
        }

        let others: Vec<Service> = self.services().cloned().collect();
        self.nodes.insert(
            key,
            Node::Service(ServiceNode {
                service: service.clone(),
                incoming: BTreeSet::new(),
                outgoing: BTreeSet::new(),
            }),
        );

        for other in &others {
            for input in service.inputs() {
                for output in other.outputs() {
                    if taxonomy.subsumes(&input.id, &output.id) {
                        self.link(other, output, input, service);
                    }
                }
            }
            for output in service.outputs() {
                for input in other.inputs() {
                    if taxonomy.subsumes(&input.id, &output.id) {
                        self.link(service, output, input, other);
                    }
                }
            }
        }
        true
    }

    fn link(&mut self, producer: &Service, output: &Parameter, input: &Parameter, consumer: &Service) {
        let ckey = connection_key(output, input);
        let entry = self.nodes.entry(ckey.clone()).or_insert_with(|| {
            Node::Connection(ConnectionNode {
                output: output.clone(),
                input: input.clone(),
                producers: BTreeSet::new(),
                consumers: BTreeSet::new(),
            })
        });
        if let Node::Connection(c) = entry {
            c.producers.insert(producer.key());
            c.consumers.insert(consumer.key());
        }
        if let Some(Node::Service(p)) = self.nodes.get_mut(&producer.key()) {
            p.outgoing.insert(ckey.clone());
        }
        if let Some(Node::Service(c)) = self.nodes.get_mut(&consumer.key()) {
            c.incoming.insert(ckey);
        }
    }

    /// Remove a service and any connection point left without a producer or
    /// without a consumer. Returns `false` if the service was absent.
    pub fn remove(&mut self, service: &Service) -> bool {
        let key = service.key();
        let node = match self.nodes.remove(&key) {
            Some(Node::Service(node)) => node,
            Some(other) => {
                self.nodes.insert(key, other);
                return false;
            }
            None => return false,
        };

        for ckey in node.incoming.iter().chain(node.outgoing.iter()) {
            let dangling = match self.nodes.get_mut(ckey) {
                Some(Node::Connection(c)) => {
                    c.producers.remove(&key);
                    c.consumers.remove(&key);
                    c.producers.is_empty() || c.consumers.is_empty()
                }
                _ => false,
            };
            if dangling {
                if let Some(Node::Connection(c)) = self.nodes.remove(ckey) {
                    for skey in c.producers.iter().chain(c.consumers.iter()) {
                        if let Some(Node::Service(s)) = self.nodes.get_mut(skey) {
                            s.incoming.remove(ckey);
                            s.outgoing.remove(ckey);
                        }
                    }
                }
            }
        }
        true
    }

    pub fn contains(&self, service: &Service) -> bool {
        self.service_node(&service.key()).is_some()
    }

    /// Look up a service by its `name:peer` key.
    pub fn get(&self, key: &str) -> Option<&Service> {
        self.service_node(key).map(|n| &n.service)
    }

    pub fn service_node(&self, key: &str) -> Option<&ServiceNode> {
        match self.nodes.get(key) {
            Some(Node::Service(n)) => Some(n),
            _ => None,
        }
    }

    pub fn connection(&self, key: &str) -> Option<&ConnectionNode> {
        match self.nodes.get(key) {
            Some(Node::Connection(c)) => Some(c),
            _ => None,
        }
    }

    /// All services, ordered by key.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.nodes.values().filter_map(|n| match n {
            Node::Service(s) => Some(&s.service),
            Node::Connection(_) => None,
        })
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionNode> {
        self.nodes.values().filter_map(|n| match n {
            Node::Connection(c) => Some(c),
            Node::Service(_) => None,
        })
    }

    pub fn service_count(&self) -> usize {
        self.services().count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections().count()
    }

    /// Services fed by any output of `service`.
    pub fn successors(&self, service: &Service) -> BTreeSet<Service> {
        let key = service.key();
        let mut found = BTreeSet::new();
        if let Some(node) = self.service_node(&key) {
            for ckey in &node.outgoing {
                if let Some(c) = self.connection(ckey) {
                    for consumer in &c.consumers {
                        if consumer != &key {
                            if let Some(s) = self.get(consumer) {
                                found.insert(s.clone());
                            }
                        }
                    }
                }
            }
        }
        found
    }

    /// Services feeding any input of `service`.
    pub fn ancestors(&self, service: &Service) -> BTreeSet<Service> {
        let key = service.key();
        let mut found = BTreeSet::new();
        if let Some(node) = self.service_node(&key) {
            for ckey in &node.incoming {
                if let Some(c) = self.connection(ckey) {
                    for producer in &c.producers {
                        if producer != &key {
                            if let Some(s) = self.get(producer) {
                                found.insert(s.clone());
                            }
                        }
                    }
                }
            }
        }
        found
    }

    /// Inputs of `service` that some connected ancestor satisfies.
    pub fn covered_inputs(&self, service: &Service) -> BTreeSet<Parameter> {
        let key = service.key();
        let mut covered = BTreeSet::new();
        if let Some(node) = self.service_node(&key) {
            for ckey in &node.incoming {
                if let Some(c) = self.connection(ckey) {
                    if c.producers.iter().any(|p| p != &key) {
                        covered.insert(c.input.clone());
                    }
                }
            }
        }
        covered
    }

    /// True when no connection point touches `service`.
    pub fn is_disconnected(&self, service: &Service) -> bool {
        self.service_node(&service.key())
            .map(|n| n.incoming.is_empty() && n.outgoing.is_empty())
            .unwrap_or(true)
    }
}

/// Inputs of `service` satisfied by some output of `ancestor`.
pub fn connected_inputs(
    service: &Service,
    ancestor: &Service,
    taxonomy: &dyn Taxonomy,
) -> BTreeSet<Parameter> {
    service
        .inputs()
        .filter(|input| {
            ancestor
                .outputs()
                .any(|output| taxonomy.subsumes(&input.id, &output.id))
        })
        .cloned()
        .collect()
}

/// True when the outputs of `ancestors` jointly satisfy every input of
/// `service`.
pub fn covers<'a>(
    service: &Service,
    ancestors: impl IntoIterator<Item = &'a Service>,
    taxonomy: &dyn Taxonomy,
) -> bool {
    let mut covered = BTreeSet::new();
    for ancestor in ancestors {
        covered.extend(connected_inputs(service, ancestor, taxonomy));
    }
    service.inputs().all(|i| covered.contains(i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::BasicTaxonomy;
    use crate::types::PeerId;

    fn tax() -> BasicTaxonomy {
        let mut t = BasicTaxonomy::new("Thing");
        t.add("A", "Thing").unwrap();
        t.add("B", "A").unwrap();
        t.add("C", "Thing").unwrap();
        t
    }

    fn svc(name: &str, inputs: &[&str], outputs: &[&str]) -> Service {
        Service::new(name, PeerId::from("p1"))
            .with_inputs(inputs.iter().copied())
            .with_outputs(outputs.iter().copied())
    }

    #[test]
    fn compatible_services_share_one_connection_point() {
        let t = tax();
        let mut g = ServiceGraph::new();
        let x = svc("X", &[], &["B"]);
        let y = svc("Y", &["A"], &[]);
        let z = svc("Z", &[], &["B"]);
        g.merge(&x, &t);
        g.merge(&y, &t);
        g.merge(&z, &t);

        assert_eq!(g.connection_count(), 1);
        let c = g.connection("O-B->I-A").unwrap();
        assert_eq!(c.producers.len(), 2);
        assert_eq!(c.consumers.len(), 1);
        assert_eq!(g.successors(&x), [y.clone()].into_iter().collect());
        assert_eq!(g.ancestors(&y), [x, z].into_iter().collect());
    }

    #[test]
    fn subsumption_sets_edge_direction() {
        let t = tax();
        let mut g = ServiceGraph::new();
        // A general output does not satisfy a more specific input.
        let general = svc("G", &[], &["A"]);
        let specific = svc("S", &["B"], &[]);
        g.merge(&general, &t);
        g.merge(&specific, &t);
        assert_eq!(g.connection_count(), 0);
        assert!(g.successors(&general).is_empty());
    }

    #[test]
    fn removal_collects_dangling_connection_points() {
        let t = tax();
        let mut g = ServiceGraph::new();
        let x = svc("X", &[], &["B"]);
        let y = svc("Y", &["A"], &[]);
        let z = svc("Z", &[], &["B"]);
        g.merge(&x, &t);
        g.merge(&y, &t);
        g.merge(&z, &t);

        assert!(g.remove(&x));
        assert_eq!(g.connection_count(), 1);
        assert!(g.remove(&y));
        assert_eq!(g.connection_count(), 0);
        assert!(g.is_disconnected(&z));
        assert!(!g.remove(&y));
    }

    #[test]
    fn merge_is_idempotent() {
        let t = tax();
        let mut g = ServiceGraph::new();
        let x = svc("X", &["C"], &["B"]);
        assert!(g.merge(&x, &t));
        assert!(!g.merge(&x, &t));
        assert_eq!(g.service_count(), 1);
        assert_eq!(g.get("X:p1"), Some(&x));
    }

    #[test]
    fn coverage_helpers() {
        let t = tax();
        let s = svc("S", &["A", "C"], &[]);
        let a = svc("PA", &[], &["B"]);
        let c = svc("PC", &[], &["C"]);
        assert_eq!(
            connected_inputs(&s, &a, &t),
            [Parameter::input("A")].into_iter().collect()
        );
        assert!(!covers(&s, [&a], &t));
        assert!(covers(&s, [&a, &c], &t));

        let g = ServiceGraph::from_services([&s, &a], &t);
        assert_eq!(
            g.covered_inputs(&s),
            [Parameter::input("A")].into_iter().collect()
        );
    }
}
