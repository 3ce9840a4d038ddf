//! Reference counting of the parameters the local services expose.

use std::collections::{BTreeMap, BTreeSet};

use svcompose::{Parameter, Service};

/// Counts how many local services expose each parameter.
///
/// A parameter is published on its first reference and withdrawn on its
/// last release; the counts in between are invisible to the rest of the
/// network.
#[derive(Debug, Default)]
pub struct ParameterCounter {
    counts: BTreeMap<Parameter, usize>,
}

impl ParameterCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the parameters of `service`. Returns those seen for the first
    /// time.
    pub fn add_service(&mut self, service: &Service) -> BTreeSet<Parameter> {
        let mut published = BTreeSet::new();
        for p in &service.parameters {
            let count = self.counts.entry(p.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                published.insert(p.clone());
            }
        }
        published
    }

    /// Release the parameters of `service`. Returns those no longer exposed
    /// by any local service.
    pub fn remove_service(&mut self, service: &Service) -> BTreeSet<Parameter> {
        let mut withdrawn = BTreeSet::new();
        for p in &service.parameters {
            if let Some(count) = self.counts.get_mut(p) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(p);
                    withdrawn.insert(p.clone());
                }
            }
        }
        withdrawn
    }

    pub fn contains(&self, parameter: &Parameter) -> bool {
        self.counts.contains_key(parameter)
    }

    pub fn parameters(&self) -> BTreeSet<Parameter> {
        self.counts.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcompose::PeerId;

    #[test]
    fn publishes_on_first_reference_and_withdraws_on_last() {
        let peer = PeerId::from("p1");
        let a = Service::new("A", peer.clone()).with_inputs(["X"]).with_outputs(["Y"]);
        let b = Service::new("B", peer).with_inputs(["X"]);
        let mut counter = ParameterCounter::new();

        assert_eq!(counter.add_service(&a).len(), 2);
        assert!(counter.add_service(&b).is_empty());

        assert_eq!(counter.remove_service(&a), [Parameter::output("Y")].into_iter().collect());
        assert!(counter.contains(&Parameter::input("X")));
        assert_eq!(counter.remove_service(&b), [Parameter::input("X")].into_iter().collect());
        assert!(counter.parameters().is_empty());
    }

    #[test]
    fn releasing_unknown_services_is_a_no_op() {
        let mut counter = ParameterCounter::new();
        let s = Service::new("S", PeerId::from("p1")).with_inputs(["X"]);
        assert!(counter.remove_service(&s).is_empty());
    }
}
