//! Forward search state: the messages each local service received and the
//! input coverage they provide.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use svcompose::{Parameter, SearchId, Service, Taxonomy};
use svcompose_wire::FCompositionMessage;
use tokio::time::Instant;

#[derive(Debug, Default, Clone)]
struct ServiceEntry {
    messages: Vec<FCompositionMessage>,
    coverage: BTreeMap<Parameter, bool>,
}

impl ServiceEntry {
    fn all_covered(&self) -> bool {
        self.coverage.values().all(|c| *c)
    }
}

#[derive(Debug, Clone)]
struct SearchEntry {
    timestamp: Instant,
    remaining: Duration,
    services: BTreeMap<Service, ServiceEntry>,
}

/// Per-search, per-service forward composition data.
///
/// Coverage is always recomputed from the stored messages, so adding a
/// duplicate or removing an unrelated ancestor leaves it unchanged.
pub struct ForwardTable {
    taxonomy: Arc<dyn Taxonomy>,
    entries: Mutex<BTreeMap<SearchId, SearchEntry>>,
}

impl ForwardTable {
    pub fn new(taxonomy: Arc<dyn Taxonomy>) -> Self {
        Self {
            taxonomy,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SearchId, SearchEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn coverage(&self, service: &Service, messages: &[FCompositionMessage]) -> BTreeMap<Parameter, bool> {
        service
            .inputs()
            .map(|input| {
                let covered = messages.iter().any(|m| {
                    m.source_service
                        .outputs()
                        .any(|o| self.taxonomy.subsumes(&input.id, &o.id))
                });
                (input.clone(), covered)
            })
            .collect()
    }

    /// Store `message` for `service`. Returns `false` for an identical
    /// message already stored.
    ///
    /// The first message of a search fixes the entry's time budget.
    pub fn add_message(&self, service: &Service, message: FCompositionMessage) -> bool {
        let mut entries = self.lock();
        let entry = entries
            .entry(message.search.clone())
            .or_insert_with(|| SearchEntry {
                timestamp: Instant::now(),
                remaining: Duration::from_millis(message.remaining_time_ms),
                services: BTreeMap::new(),
            });
        let se = entry.services.entry(service.clone()).or_default();
        if se.messages.contains(&message) {
            return false;
        }
        se.messages.push(message);
        se.coverage = self.coverage(service, &se.messages);
        true
    }

    /// False for unknown searches or services.
    pub fn are_all_inputs_covered(&self, search: &SearchId, service: &Service) -> bool {
        self.lock()
            .get(search)
            .and_then(|e| e.services.get(service))
            .is_some_and(ServiceEntry::all_covered)
    }

    pub fn input_coverage(&self, search: &SearchId, service: &Service) -> BTreeMap<Parameter, bool> {
        self.lock()
            .get(search)
            .and_then(|e| e.services.get(service))
            .map(|se| se.coverage.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self, search: &SearchId, service: &Service) -> Vec<FCompositionMessage> {
        self.lock()
            .get(search)
            .and_then(|e| e.services.get(service))
            .map(|se| se.messages.clone())
            .unwrap_or_default()
    }

    /// Drop the messages `service` received from any of `ancestors` and
    /// recompute its coverage. Returns whether the service was fully covered
    /// before and after, or `None` if nothing was stored for it.
    pub fn remove_ancestor_messages(
        &self,
        search: &SearchId,
        service: &Service,
        ancestors: &BTreeSet<Service>,
    ) -> Option<(bool, bool)> {
        let mut entries = self.lock();
        let se = entries.get_mut(search)?.services.get_mut(service)?;
        let was = se.all_covered();
        se.messages.retain(|m| !ancestors.contains(&m.source_service));
        se.coverage = self.coverage(service, &se.messages);
        Some((was, se.all_covered()))
    }

    /// Searches in which `service` received messages.
    pub fn searches_with(&self, service: &Service) -> Vec<SearchId> {
        self.lock()
            .iter()
            .filter(|(_, e)| e.services.contains_key(service))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Time left for a search; zero when unknown.
    pub fn remaining_time(&self, search: &SearchId) -> Duration {
        self.lock().get(search).map_or(Duration::ZERO, |e| {
            e.remaining.saturating_sub(e.timestamp.elapsed())
        })
    }

    pub fn contains(&self, search: &SearchId) -> bool {
        self.lock().contains_key(search)
    }

    /// Remove entries with `now − timestamp ≥ remaining`.
    pub fn remove_expired(&self, now: Instant) -> Vec<SearchId> {
        let mut entries = self.lock();
        let expired: Vec<SearchId> = entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.timestamp) >= e.remaining)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
        }
        expired
    }
}

impl std::fmt::Debug for ForwardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardTable")
            .field("searches", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use svcompose::{BasicTaxonomy, PeerId};

    fn taxonomy() -> Arc<dyn Taxonomy> {
        let mut t = BasicTaxonomy::new("Thing");
        for c in ["A", "B", "C", "D"] {
            t.add(c, "Thing").unwrap();
        }
        t.add("A1", "A").unwrap();
        Arc::new(t)
    }

    fn search() -> SearchId {
        SearchId::new(PeerId::from("p1"), 1)
    }

    fn msg(from: &Service, to: &Service, remaining_ms: u64) -> FCompositionMessage {
        FCompositionMessage::new(
            from.peer.clone(),
            search(),
            from.clone(),
            [to.clone()].into_iter().collect(),
            3,
            remaining_ms,
            1,
            [from.clone()].into_iter().collect(),
            BTreeMap::new(),
        )
    }

    fn producer(name: &str, output: &str) -> Service {
        Service::new(name, PeerId::from("p2")).with_outputs([output])
    }

    #[test]
    fn coverage_completes_only_with_the_last_needed_ancestor_in_any_order() {
        let target = Service::new("S", PeerId::from("p1")).with_inputs(["A", "B", "C"]);
        let producers = vec![
            producer("PA", "A1"),
            producer("PB", "B"),
            producer("PC", "C"),
            producer("PD", "D"),
        ];
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let table = ForwardTable::new(taxonomy());
            let mut order = producers.clone();
            order.shuffle(&mut rng);
            let needed: BTreeSet<&str> = ["PA", "PB", "PC"].into_iter().collect();
            let mut seen = BTreeSet::new();
            for p in &order {
                table.add_message(&target, msg(p, &target, 1000));
                if needed.contains(p.name.as_str()) {
                    seen.insert(p.name.clone());
                }
                assert_eq!(
                    table.are_all_inputs_covered(&search(), &target),
                    seen.len() == needed.len()
                );
            }
        }
    }

    #[test]
    fn duplicates_are_ignored() {
        let table = ForwardTable::new(taxonomy());
        let target = Service::new("S", PeerId::from("p1")).with_inputs(["A"]);
        let p = producer("PA", "A");
        assert!(table.add_message(&target, msg(&p, &target, 1000)));
        assert!(!table.add_message(&target, msg(&p, &target, 1000)));
        assert_eq!(table.messages(&search(), &target).len(), 1);
    }

    #[test]
    fn removing_an_unrelated_ancestor_keeps_coverage() {
        let table = ForwardTable::new(taxonomy());
        let target = Service::new("S", PeerId::from("p1")).with_inputs(["A"]);
        let pa = producer("PA", "A");
        let pd = producer("PD", "D");
        table.add_message(&target, msg(&pa, &target, 1000));
        table.add_message(&target, msg(&pd, &target, 1000));

        let gone = [pd].into_iter().collect();
        assert_eq!(table.remove_ancestor_messages(&search(), &target, &gone), Some((true, true)));
    }

    #[test]
    fn removing_the_only_provider_uncovers_unless_another_covers() {
        let table = ForwardTable::new(taxonomy());
        let target = Service::new("S", PeerId::from("p1")).with_inputs(["A"]);
        let pa = producer("PA", "A");
        let pa1 = producer("PA1", "A1");
        table.add_message(&target, msg(&pa, &target, 1000));
        table.add_message(&target, msg(&pa1, &target, 1000));

        let first = [pa].into_iter().collect();
        assert_eq!(table.remove_ancestor_messages(&search(), &target, &first), Some((true, true)));
        let second = [pa1].into_iter().collect();
        assert_eq!(table.remove_ancestor_messages(&search(), &target, &second), Some((true, false)));
        assert!(!table.input_coverage(&search(), &target)[&Parameter::input("A")]);
    }

    #[test]
    fn unknown_entries_are_not_covered() {
        let table = ForwardTable::new(taxonomy());
        let s = Service::new("S", PeerId::from("p1")).with_inputs(["A"]);
        assert!(!table.are_all_inputs_covered(&search(), &s));
        assert_eq!(table.remaining_time(&search()), Duration::ZERO);
        assert!(table.remove_ancestor_messages(&search(), &s, &BTreeSet::new()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_the_first_message_budget() {
        let table = ForwardTable::new(taxonomy());
        let target = Service::new("S", PeerId::from("p1")).with_inputs(["A"]);
        table.add_message(&target, msg(&producer("PA", "A"), &target, 300));

        tokio::time::advance(Duration::from_millis(299)).await;
        assert!(table.remove_expired(Instant::now()).is_empty());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(table.remove_expired(Instant::now()), vec![search()]);
        assert!(!table.contains(&search()));
    }
}
