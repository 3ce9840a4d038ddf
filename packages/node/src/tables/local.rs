//! Searches started by the local peer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use svcompose::{SearchId, Service};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// Registered but not started yet.
    Waiting,
    Running,
    /// Never registered, or already expired.
    Unknown,
}

#[derive(Debug, Clone)]
struct SearchRecord {
    init: Service,
    goal: Service,
    max_ttl: u32,
    search_time: Duration,
    was_prepared: bool,
    started: Instant,
    status: SearchStatus,
    found: BTreeSet<BTreeSet<Service>>,
}

/// A search removed by [`LocalSearchesTable::remove_expired`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredSearch {
    pub search: SearchId,
    pub init: Service,
    pub goal: Service,
    pub was_prepared: bool,
}

#[derive(Debug, Default)]
struct Inner {
    searches: BTreeMap<SearchId, SearchRecord>,
    /// Target key → INIT, GOAL and search of a prepared composition.
    prepared: BTreeMap<String, (Service, Service, SearchId)>,
}

#[derive(Debug, Default)]
pub struct LocalSearchesTable {
    inner: Mutex<Inner>,
}

impl LocalSearchesTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a search in the `Waiting` state. The search clock starts
    /// now.
    pub fn add_search(
        &self,
        search: SearchId,
        init: Service,
        goal: Service,
        max_ttl: u32,
        search_time: Duration,
        was_prepared: bool,
    ) {
        self.lock().searches.insert(
            search,
            SearchRecord {
                init,
                goal,
                max_ttl,
                search_time,
                was_prepared,
                started: Instant::now(),
                status: SearchStatus::Waiting,
                found: BTreeSet::new(),
            },
        );
    }

    /// Move a waiting search to `Running`. Returns `false` for unknown
    /// searches.
    pub fn start_search(&self, search: &SearchId) -> bool {
        match self.lock().searches.get_mut(search) {
            Some(r) => {
                r.status = SearchStatus::Running;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, search: &SearchId) -> SearchStatus {
        self.lock()
            .searches
            .get(search)
            .map_or(SearchStatus::Unknown, |r| r.status)
    }

    pub fn is_running(&self, search: &SearchId) -> bool {
        self.status(search) == SearchStatus::Running
    }

    /// Time left before the search expires; zero for unknown searches.
    pub fn remaining_time(&self, search: &SearchId) -> Duration {
        self.lock().searches.get(search).map_or(Duration::ZERO, |r| {
            r.search_time.saturating_sub(r.started.elapsed())
        })
    }

    pub fn max_ttl(&self, search: &SearchId) -> u32 {
        self.lock().searches.get(search).map_or(0, |r| r.max_ttl)
    }

    /// INIT and GOAL of a registered search.
    pub fn endpoints(&self, search: &SearchId) -> Option<(Service, Service)> {
        self.lock()
            .searches
            .get(search)
            .map(|r| (r.init.clone(), r.goal.clone()))
    }

    /// The running search whose GOAL is `goal`.
    pub fn search_of_goal(&self, goal: &Service) -> Option<SearchId> {
        self.lock()
            .searches
            .iter()
            .find(|(_, r)| r.status == SearchStatus::Running && r.goal == *goal)
            .map(|(id, _)| id.clone())
    }

    /// Remember `composition` as found. Returns `false` if it was already
    /// reported or the search is not running.
    pub fn record_found(&self, search: &SearchId, composition: &BTreeSet<Service>) -> bool {
        match self.lock().searches.get_mut(search) {
            Some(r) if r.status == SearchStatus::Running => r.found.insert(composition.clone()),
            _ => false,
        }
    }

    /// Remove searches whose time ran out at `now`.
    pub fn remove_expired(&self, now: Instant) -> Vec<ExpiredSearch> {
        let mut inner = self.lock();
        let expired: Vec<SearchId> = inner
            .searches
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.started) >= r.search_time)
            .map(|(id, _)| id.clone())
            .collect();
        let mut out = Vec::with_capacity(expired.len());
        for search in expired {
            if let Some(r) = inner.searches.remove(&search) {
                out.push(ExpiredSearch {
                    search,
                    init: r.init,
                    goal: r.goal,
                    was_prepared: r.was_prepared,
                });
            }
        }
        out
    }

    pub fn prepared(&self, target: &Service) -> Option<(Service, Service, SearchId)> {
        self.lock().prepared.get(&target.key()).cloned()
    }

    pub fn add_prepared(&self, target: &Service, init: Service, goal: Service, search: SearchId) {
        self.lock().prepared.insert(target.key(), (init, goal, search));
    }

    pub fn remove_prepared(&self, target: &Service) -> Option<(Service, Service, SearchId)> {
        self.lock().prepared.remove(&target.key())
    }

    pub fn len(&self) -> usize {
        self.lock().searches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
