//! Backward search state: received messages arranged into message trees,
//! plus the covering sets each local service splits messages over.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use svcompose::{CoveringSet, MessageId, MessageTree, SearchId, Service};
use svcompose_wire::BCompositionMessage;
use tokio::time::Instant;

/// Upper bound on the alternatives read out of one message tree.
pub const MAX_ALTERNATIVES: usize = 32;

#[derive(Debug, Clone, Default)]
struct ServiceEntry {
    messages: Vec<BCompositionMessage>,
    trees: BTreeMap<MessageId, MessageTree<BCompositionMessage>>,
}

impl ServiceEntry {
    fn rebuild(&mut self) {
        self.trees.clear();
        for m in &self.messages {
            let root = m.message_part.root.clone();
            self.trees
                .entry(root.clone())
                .or_insert_with(|| MessageTree::new(root))
                .add_message(m.clone());
        }
    }
}

#[derive(Debug, Clone)]
struct SearchEntry {
    timestamp: Instant,
    remaining: Duration,
    services: BTreeMap<Service, ServiceEntry>,
}

#[derive(Debug, Default)]
struct Inner {
    searches: BTreeMap<SearchId, SearchEntry>,
    covering: BTreeMap<Service, BTreeSet<CoveringSet>>,
}

#[derive(Debug, Default)]
pub struct BackwardTable {
    inner: Mutex<Inner>,
}

impl BackwardTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Store `message` for `service` and file it under its root. Returns
    /// whether that tree is now complete, or `None` for a duplicate.
    pub fn add_message(&self, service: &Service, message: BCompositionMessage) -> Option<bool> {
        let mut inner = self.lock();
        let entry = inner
            .searches
            .entry(message.search.clone())
            .or_insert_with(|| SearchEntry {
                timestamp: Instant::now(),
                remaining: Duration::from_millis(message.remaining_time_ms),
                services: BTreeMap::new(),
            });
        let se = entry.services.entry(service.clone()).or_default();
        if se.messages.contains(&message) {
            return None;
        }
        let root = message.message_part.root.clone();
        se.messages.push(message.clone());
        let tree = se
            .trees
            .entry(root.clone())
            .or_insert_with(|| MessageTree::new(root));
        tree.add_message(message);
        Some(tree.is_complete())
    }

    /// The complete alternatives of the tree rooted at `root`, at most
    /// [`MAX_ALTERNATIVES`] of them.
    pub fn complete_alternatives(
        &self,
        search: &SearchId,
        service: &Service,
        root: &MessageId,
    ) -> Vec<Vec<BCompositionMessage>> {
        let inner = self.lock();
        let Some(tree) = inner
            .searches
            .get(search)
            .and_then(|e| e.services.get(service))
            .and_then(|se| se.trees.get(root))
        else {
            return Vec::new();
        };
        tree.alternatives(MAX_ALTERNATIVES)
            .into_iter()
            .map(|ms| ms.into_iter().cloned().collect())
            .collect()
    }

    /// One complete alternative per complete tree `service` holds for
    /// `search`.
    pub fn complete_trees(&self, search: &SearchId, service: &Service) -> Vec<Vec<BCompositionMessage>> {
        let inner = self.lock();
        inner
            .searches
            .get(search)
            .and_then(|e| e.services.get(service))
            .map(|se| {
                se.trees
                    .values()
                    .filter_map(|t| t.complete_messages())
                    .map(|ms| ms.into_iter().cloned().collect())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every message `service` received, across searches.
    pub fn messages(&self, service: &Service) -> Vec<BCompositionMessage> {
        self.lock()
            .searches
            .values()
            .filter_map(|e| e.services.get(service))
            .flat_map(|se| se.messages.iter().cloned())
            .collect()
    }

    /// Drop the messages `service` received from any of `successors` and
    /// rebuild its trees from the rest.
    pub fn remove_successor_messages(&self, service: &Service, successors: &BTreeSet<Service>) {
        let mut inner = self.lock();
        for entry in inner.searches.values_mut() {
            if let Some(se) = entry.services.get_mut(service) {
                let before = se.messages.len();
                se.messages.retain(|m| !successors.contains(&m.source_service));
                if se.messages.len() != before {
                    se.rebuild();
                }
            }
        }
    }

    pub fn covering_sets(&self, service: &Service) -> BTreeSet<CoveringSet> {
        self.lock().covering.get(service).cloned().unwrap_or_default()
    }

    pub fn add_covering_sets(&self, service: &Service, sets: &BTreeSet<CoveringSet>) {
        if sets.is_empty() {
            return;
        }
        self.lock()
            .covering
            .entry(service.clone())
            .or_default()
            .extend(sets.iter().cloned());
    }

    /// Drop covering sets of `service` that contain any of `lost`.
    pub fn remove_covering_sets_with(&self, service: &Service, lost: &BTreeSet<Service>) {
        let mut inner = self.lock();
        if let Some(sets) = inner.covering.get_mut(service) {
            sets.retain(|set| set.is_disjoint(lost));
            if sets.is_empty() {
                inner.covering.remove(service);
            }
        }
    }

    pub fn forget_service(&self, service: &Service) {
        let mut inner = self.lock();
        inner.covering.remove(service);
        for entry in inner.searches.values_mut() {
            entry.services.remove(service);
        }
    }

    /// Time left for a search; zero when unknown.
    pub fn remaining_time(&self, search: &SearchId) -> Duration {
        self.lock().searches.get(search).map_or(Duration::ZERO, |e| {
            e.remaining.saturating_sub(e.timestamp.elapsed())
        })
    }

    pub fn contains(&self, search: &SearchId) -> bool {
        self.lock().searches.contains_key(search)
    }

    /// Remove entries with `now − timestamp ≥ remaining`.
    pub fn remove_expired(&self, now: Instant) -> Vec<SearchId> {
        let mut inner = self.lock();
        let expired: Vec<SearchId> = inner
            .searches
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.timestamp) >= e.remaining)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.searches.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use svcompose::{IdGenerator, MessagePart, PeerId};

    fn message(
        search: &SearchId,
        from: &Service,
        to: &Service,
        part: MessagePart,
    ) -> BCompositionMessage {
        BCompositionMessage::new(
            from.peer.clone(),
            search.clone(),
            from.clone(),
            [to.clone()].into_iter().collect(),
            4,
            1000,
            1,
            [from.clone(), to.clone()].into_iter().collect(),
            BTreeMap::new(),
            part,
        )
    }

    #[test]
    fn tree_completes_once_every_sibling_arrives() {
        let ids = IdGenerator::new(PeerId::from("p1"));
        let search = ids.next_search_id();
        let init = Service::new("T-INIT-1", PeerId::from("p1"));
        let succ: Vec<Service> = (0..3)
            .map(|i| Service::new(format!("S{i}"), PeerId::from("p2")))
            .collect();
        let root = MessagePart::new(ids.next_message_id());
        let mut msgs: Vec<_> = root
            .split(3, &ids)
            .into_iter()
            .zip(&succ)
            .map(|(part, s)| message(&search, s, &init, part))
            .collect();
        msgs.shuffle(&mut rand::thread_rng());

        let table = BackwardTable::new();
        let last = msgs.pop().unwrap();
        for m in msgs {
            assert_eq!(table.add_message(&init, m.clone()), Some(false));
            assert_eq!(table.add_message(&init, m), None);
        }
        assert_eq!(table.add_message(&init, last), Some(true));
        assert_eq!(table.complete_trees(&search, &init).len(), 1);
        assert_eq!(table.complete_alternatives(&search, &init, &root.root).len(), 1);
    }

    #[test]
    fn removing_a_successor_rebuilds_the_tree() {
        let ids = IdGenerator::new(PeerId::from("p1"));
        let search = ids.next_search_id();
        let init = Service::new("T-INIT-1", PeerId::from("p1"));
        let a = Service::new("A", PeerId::from("p2"));
        let b = Service::new("B", PeerId::from("p3"));
        let root = MessagePart::new(ids.next_message_id());
        let parts = root.split(2, &ids);
        let table = BackwardTable::new();
        table.add_message(&init, message(&search, &a, &init, parts[0].clone()));
        table.add_message(&init, message(&search, &b, &init, parts[1].clone()));
        assert!(!table.complete_alternatives(&search, &init, &root.root).is_empty());

        table.remove_successor_messages(&init, &[b].into_iter().collect());
        assert!(table.complete_alternatives(&search, &init, &root.root).is_empty());
        assert_eq!(table.messages(&init).len(), 1);
    }

    #[test]
    fn covering_sets_with_lost_ancestors_are_dropped() {
        let table = BackwardTable::new();
        let s = Service::new("S", PeerId::from("p1"));
        let a = Service::new("A", PeerId::from("p2"));
        let b = Service::new("B", PeerId::from("p3"));
        let sets: BTreeSet<CoveringSet> = [
            [a.clone()].into_iter().collect(),
            [b.clone()].into_iter().collect(),
        ]
        .into_iter()
        .collect();
        table.add_covering_sets(&s, &sets);
        table.remove_covering_sets_with(&s, &[a].into_iter().collect());
        let left = table.covering_sets(&s);
        assert_eq!(left.len(), 1);
        assert!(left.iter().all(|set| set.contains(&b)));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let ids = IdGenerator::new(PeerId::from("p1"));
        let search = ids.next_search_id();
        let s = Service::new("S", PeerId::from("p1"));
        let table = BackwardTable::new();
        table.add_message(&s, message(&search, &s, &s, MessagePart::new(ids.next_message_id())));
        assert_eq!(table.remaining_time(&search), Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(table.remove_expired(Instant::now()), vec![search.clone()]);
        assert!(!table.contains(&search));
    }
}
