//! Search and message identifiers.
//!
//! Identifiers pair the originating peer with a per-peer counter. Counters
//! live in an [`IdGenerator`] owned by one peer instance, so two peers in
//! the same process never share sequence state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::PeerId;

/// Identifies one composition search end-to-end across the network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SearchId {
    pub peer: PeerId,
    pub id: u64,
}

impl SearchId {
    pub fn new(peer: PeerId, id: u64) -> Self {
        Self { peer, id }
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.peer, self.id)
    }
}

/// Identifies a message, a message partition, or a collision search route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub peer: PeerId,
    pub id: u64,
}

impl MessageId {
    pub fn new(peer: PeerId, id: u64) -> Self {
        Self { peer, id }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.peer, self.id)
    }
}

/// Per-peer source of fresh identifiers.
///
/// Both counters start at 1 and increase monotonically. The generator is
/// `Sync`, so it can be shared by reference between the message path and
/// the sweeper.
#[derive(Debug)]
pub struct IdGenerator {
    peer: PeerId,
    searches: AtomicU64,
    messages: AtomicU64,
}

impl IdGenerator {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            searches: AtomicU64::new(1),
            messages: AtomicU64::new(1),
        }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn next_search_id(&self) -> SearchId {
        SearchId::new(self.peer.clone(), self.searches.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_message_id(&self) -> MessageId {
        MessageId::new(self.peer.clone(), self.messages.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent_and_monotonic() {
        let ids = IdGenerator::new(PeerId::from("p1"));
        let s1 = ids.next_search_id();
        let m1 = ids.next_message_id();
        let s2 = ids.next_search_id();
        assert_eq!(s1.id, 1);
        assert_eq!(m1.id, 1);
        assert_eq!(s2.id, 2);
        assert!(s1 < s2);
        assert_eq!(s1.peer, PeerId::from("p1"));
    }

    #[test]
    fn generators_do_not_share_state() {
        let a = IdGenerator::new(PeerId::from("a"));
        let b = IdGenerator::new(PeerId::from("b"));
        a.next_search_id();
        a.next_search_id();
        assert_eq!(b.next_search_id().id, 1);
    }
}
