//! Covering sets for the backward search.
//!
//! A covering set of a service is a set of its ancestors whose outputs
//! jointly satisfy every input of the service, and which has no covering
//! proper subset. Sets are enumerated by ascending size so that each
//! minimal set is found before any of its supersets.

use std::collections::BTreeSet;

use crate::graph::{connected_inputs, covers};
use crate::taxonomy::Taxonomy;
use crate::types::Service;

/// Upper bound on the ancestors considered when enumerating subsets.
/// Ancestors beyond it (in service order) are ignored.
pub const MAX_COVERING_CANDIDATES: usize = 16;

pub type CoveringSet = BTreeSet<Service>;

/// Minimal covering sets of `service` drawn from `ancestors`, excluding any
/// set that is a superset of one in `known`.
///
/// Services without inputs have no covering sets.
pub fn covering_sets(
    service: &Service,
    ancestors: &BTreeSet<Service>,
    known: &BTreeSet<CoveringSet>,
    taxonomy: &dyn Taxonomy,
) -> BTreeSet<CoveringSet> {
    let mut found = BTreeSet::new();
    if service.inputs().next().is_none() {
        return found;
    }

    let candidates: Vec<&Service> = ancestors
        .iter()
        .filter(|a| *a != service && !connected_inputs(service, a, taxonomy).is_empty())
        .take(MAX_COVERING_CANDIDATES)
        .collect();

    for size in 1..=candidates.len() {
        for_each_combination(candidates.len(), size, |indices| {
            let subset: CoveringSet = indices.iter().map(|&i| candidates[i].clone()).collect();
            let redundant = known
                .iter()
                .chain(found.iter())
                .any(|k: &CoveringSet| k.is_subset(&subset));
            if !redundant && covers(service, &subset, taxonomy) {
                found.insert(subset);
            }
        });
    }
    found
}

/// Calls `f` with every `k`-combination of `0..n` in lexicographic order.
fn for_each_combination(n: usize, k: usize, mut f: impl FnMut(&[usize])) {
    if k == 0 || k > n {
        return;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        f(&idx);
        let mut i = k;
        loop {
            if i == 0 {
                return;
            }
            i -= 1;
            if idx[i] != i + n - k {
                break;
            }
            if i == 0 {
                return;
            }
        }
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::BasicTaxonomy;
    use crate::types::PeerId;

    fn tax() -> BasicTaxonomy {
        let mut t = BasicTaxonomy::new("Thing");
        for c in ["A", "B", "C"] {
            t.add(c, "Thing").unwrap();
        }
        t
    }

    fn svc(name: &str, inputs: &[&str], outputs: &[&str]) -> Service {
        Service::new(name, PeerId::from("p1"))
            .with_inputs(inputs.iter().copied())
            .with_outputs(outputs.iter().copied())
    }

    fn set(services: &[&Service]) -> CoveringSet {
        services.iter().map(|s| (*s).clone()).collect()
    }

    #[test]
    fn combinations_are_enumerated_in_order() {
        let mut seen = Vec::new();
        for_each_combination(4, 2, |c| seen.push(c.to_vec()));
        assert_eq!(
            seen,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        let mut count = 0;
        for_each_combination(3, 0, |_| count += 1);
        for_each_combination(2, 3, |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn minimal_sets_only() {
        let tax = tax();
        let s = svc("S", &["A", "B"], &[]);
        let ab = svc("AB", &[], &["A", "B"]);
        let a = svc("OA", &[], &["A"]);
        let b = svc("OB", &[], &["B"]);
        let c = svc("OC", &[], &["C"]);
        let ancestors = set(&[&ab, &a, &b, &c]);

        let sets = covering_sets(&s, &ancestors, &BTreeSet::new(), &tax);
        assert_eq!(sets.len(), 2);
        assert!(sets.contains(&set(&[&ab])));
        assert!(sets.contains(&set(&[&a, &b])));
    }

    #[test]
    fn known_sets_suppress_supersets() {
        let tax = tax();
        let s = svc("S", &["A"], &[]);
        let a1 = svc("A1", &[], &["A"]);
        let a2 = svc("A2", &[], &["A"]);
        let known: BTreeSet<CoveringSet> = [set(&[&a1])].into_iter().collect();

        let sets = covering_sets(&s, &set(&[&a1, &a2]), &known, &tax);
        assert_eq!(sets, [set(&[&a2])].into_iter().collect());
    }

    #[test]
    fn uncoverable_and_input_free_services() {
        let tax = tax();
        let s = svc("S", &["A", "C"], &[]);
        let a = svc("OA", &[], &["A"]);
        assert!(covering_sets(&s, &set(&[&a]), &BTreeSet::new(), &tax).is_empty());

        let source = svc("Src", &[], &["A"]);
        assert!(covering_sets(&source, &set(&[&a]), &BTreeSet::new(), &tax).is_empty());
    }
}
