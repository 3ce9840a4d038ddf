//! Composition outcome callbacks.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use svcompose::render::render_composition;
use svcompose::{SearchId, Service};
use tokio::sync::Notify;
use tracing::info;

/// Receives the outcome of the searches a peer owns.
pub trait CompositionListener: Send + Sync {
    fn composition_found(&self, search: &SearchId, composition: &BTreeSet<Service>, hops: u32);

    fn composition_time_expired(&self, search: &SearchId);

    /// A previously found composition is no longer valid.
    fn compositions_lost(&self, search: &SearchId, invalid: &BTreeSet<Service>);

    /// Services left a composition that is still valid.
    fn composition_modified(&self, search: &SearchId, removed: &BTreeSet<Service>);
}

/// Logs every callback through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl CompositionListener for LoggingListener {
    fn composition_found(&self, search: &SearchId, composition: &BTreeSet<Service>, hops: u32) {
        info!(
            "listener: composition found for {search}\n{}",
            render_composition(search, composition, hops)
        );
    }

    fn composition_time_expired(&self, search: &SearchId) {
        info!("listener: search {search} expired");
    }

    fn compositions_lost(&self, search: &SearchId, invalid: &BTreeSet<Service>) {
        info!("listener: compositions of {search} lost ({} invalid services)", invalid.len());
    }

    fn composition_modified(&self, search: &SearchId, removed: &BTreeSet<Service>) {
        info!("listener: composition of {search} modified ({} services removed)", removed.len());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositionEvent {
    Found {
        search: SearchId,
        composition: BTreeSet<Service>,
        hops: u32,
    },
    Expired {
        search: SearchId,
    },
    Lost {
        search: SearchId,
        invalid: BTreeSet<Service>,
    },
    Modified {
        search: SearchId,
        removed: BTreeSet<Service>,
    },
}

impl CompositionEvent {
    pub fn search(&self) -> &SearchId {
        match self {
            CompositionEvent::Found { search, .. }
            | CompositionEvent::Expired { search }
            | CompositionEvent::Lost { search, .. }
            | CompositionEvent::Modified { search, .. } => search,
        }
    }
}

/// Keeps every callback in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<CompositionEvent>>,
    changed: Notify,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: CompositionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
        self.changed.notify_waiters();
    }

    pub fn events(&self) -> Vec<CompositionEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn events_for(&self, search: &SearchId) -> Vec<CompositionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.search() == search)
            .collect()
    }

    /// Compositions found for `search`, with their hop counts.
    pub fn found(&self, search: &SearchId) -> Vec<(BTreeSet<Service>, u32)> {
        self.events_for(search)
            .into_iter()
            .filter_map(|e| match e {
                CompositionEvent::Found {
                    composition, hops, ..
                } => Some((composition, hops)),
                _ => None,
            })
            .collect()
    }

    pub fn expired(&self, search: &SearchId) -> bool {
        self.events_for(search)
            .iter()
            .any(|e| matches!(e, CompositionEvent::Expired { .. }))
    }

    /// Wait until an event satisfies `pred` or `timeout` elapses. Returns the
    /// matching event.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        pred: impl Fn(&CompositionEvent) -> bool,
    ) -> Option<CompositionEvent> {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if let Some(e) = self.events().into_iter().find(|e| pred(e)) {
                    return e;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }
}

impl CompositionListener for RecordingListener {
    fn composition_found(&self, search: &SearchId, composition: &BTreeSet<Service>, hops: u32) {
        self.push(CompositionEvent::Found {
            search: search.clone(),
            composition: composition.clone(),
            hops,
        });
    }

    fn composition_time_expired(&self, search: &SearchId) {
        self.push(CompositionEvent::Expired {
            search: search.clone(),
        });
    }

    fn compositions_lost(&self, search: &SearchId, invalid: &BTreeSet<Service>) {
        self.push(CompositionEvent::Lost {
            search: search.clone(),
            invalid: invalid.clone(),
        });
    }

    fn composition_modified(&self, search: &SearchId, removed: &BTreeSet<Service>) {
        self.push(CompositionEvent::Modified {
            search: search.clone(),
            removed: removed.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use svcompose::PeerId;

    #[test]
    fn recording_listener_filters_by_search() {
        let l = RecordingListener::new();
        let s1 = SearchId::new(PeerId::from("p1"), 1);
        let s2 = SearchId::new(PeerId::from("p1"), 2);
        l.composition_found(&s1, &BTreeSet::new(), 3);
        l.composition_time_expired(&s2);
        l.composition_time_expired(&s1);

        assert_eq!(l.events().len(), 3);
        assert_eq!(l.found(&s1), vec![(BTreeSet::new(), 3)]);
        assert!(l.found(&s2).is_empty());
        assert!(l.expired(&s2));
    }

    #[tokio::test]
    async fn wait_for_wakes_on_new_events() {
        let l = Arc::new(RecordingListener::new());
        let s = SearchId::new(PeerId::from("p1"), 1);

        let producer = Arc::clone(&l);
        let search = s.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.compositions_lost(&search, &BTreeSet::new());
        });

        let got = l
            .wait_for(Duration::from_secs(5), |e| matches!(e, CompositionEvent::Lost { .. }))
            .await;
        assert_eq!(got.map(|e| e.search().clone()), Some(s));
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let l = RecordingListener::new();
        let got = l.wait_for(Duration::from_millis(10), |_| true).await;
        assert!(got.is_none());
    }
}
