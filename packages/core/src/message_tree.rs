//! Split/merge bookkeeping for backward composition messages.
//!
//! A message that has to fan out to `k` destinations is split into `k`
//! siblings. Each sibling appends one [`Part`] `(total = k, index, partition)`
//! to the [`MessagePart`] it inherited, and all siblings share the same fresh
//! partition id. The root id never changes, so every descendant of one
//! original message can be gathered into a single [`MessageTree`].
//!
//! Every message carries the full path of parts from the root, so the tree
//! can be rebuilt from any arrival order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{IdGenerator, MessageId};

/// One split coordinate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Part {
    pub total: u32,
    pub index: u32,
    pub partition: MessageId,
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}:{}]", self.index, self.total, self.partition)
    }
}

/// The position of a message in the split tree of its root message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagePart {
    pub root: MessageId,
    pub parts: Vec<Part>,
}

impl MessagePart {
    /// The coordinate of an original, unsplit message.
    pub fn new(root: MessageId) -> Self {
        Self {
            root,
            parts: Vec::new(),
        }
    }

    pub fn split_level(&self) -> usize {
        self.parts.len()
    }

    /// Derive `n` siblings sharing one fresh partition id, indexed `0..n`.
    pub fn split(&self, n: usize, ids: &IdGenerator) -> Vec<MessagePart> {
        let partition = ids.next_message_id();
        let total = n as u32;
        (0..total)
            .map(|index| {
                let mut parts = self.parts.clone();
                parts.push(Part {
                    total,
                    index,
                    partition: partition.clone(),
                });
                MessagePart {
                    root: self.root.clone(),
                    parts,
                }
            })
            .collect()
    }

    /// True when `parts` agree on one total and cover exactly `0..total`.
    pub fn are_complete<'a>(parts: impl IntoIterator<Item = &'a Part>) -> bool {
        let mut totals = BTreeSet::new();
        let mut indices = BTreeSet::new();
        for p in parts {
            totals.insert(p.total);
            indices.insert(p.index);
        }
        level_complete(&totals, &indices)
    }
}

fn level_complete(totals: &BTreeSet<u32>, indices: &BTreeSet<u32>) -> bool {
    if totals.len() != 1 {
        return false;
    }
    let total = totals.iter().next().copied().unwrap_or(0);
    indices.len() == total as usize && indices.iter().copied().eq(0..total)
}

/// Anything that carries a [`MessagePart`].
pub trait Partitioned {
    fn message_part(&self) -> &MessagePart;
}

impl Partitioned for MessagePart {
    fn message_part(&self) -> &MessagePart {
        self
    }
}

/// One observed split: the sibling branches seen so far under a partition.
#[derive(Debug, Clone, Default)]
struct SplitNode {
    totals: BTreeSet<u32>,
    branches: BTreeMap<u32, Branch>,
}

impl SplitNode {
    fn is_complete(&self) -> bool {
        let indices: BTreeSet<u32> = self.branches.keys().copied().collect();
        level_complete(&self.totals, &indices) && self.branches.values().all(Branch::is_complete)
    }
}

/// A position in the split tree. `terminal` is the index of the message
/// that ended here; `splits` holds the alternative ways the message at this
/// position was split further, keyed by partition id.
#[derive(Debug, Clone, Default)]
struct Branch {
    terminal: Option<usize>,
    splits: BTreeMap<MessageId, SplitNode>,
}

impl Branch {
    fn is_complete(&self) -> bool {
        self.terminal.is_some() || self.splits.values().any(SplitNode::is_complete)
    }

    /// Indices of the messages of one complete alternative below this
    /// branch: the message ending here, else the first complete split.
    fn select(&self, out: &mut Vec<usize>) -> bool {
        if let Some(i) = self.terminal {
            out.push(i);
            return true;
        }
        match self.splits.values().find(|s| s.is_complete()) {
            Some(split) => split.branches.values().all(|b| b.select(out)),
            None => false,
        }
    }

    /// Every complete alternative below this branch, as message indices,
    /// stopping after `limit` alternatives.
    fn alternatives(&self, limit: usize) -> Vec<Vec<usize>> {
        if let Some(i) = self.terminal {
            return vec![vec![i]];
        }
        let mut found = Vec::new();
        for split in self.splits.values().filter(|s| s.is_complete()) {
            let mut partial: Vec<Vec<usize>> = vec![Vec::new()];
            for branch in split.branches.values() {
                let below = branch.alternatives(limit);
                partial = partial
                    .iter()
                    .flat_map(|p| {
                        below.iter().map(move |b| {
                            let mut joined = p.clone();
                            joined.extend(b);
                            joined
                        })
                    })
                    .take(limit)
                    .collect();
            }
            found.extend(partial);
            if found.len() >= limit {
                found.truncate(limit);
                break;
            }
        }
        found
    }
}

/// Messages descended from one root, arranged by their split coordinates.
///
/// A split level is complete when its observed indices are exactly
/// `0..total` under a single `total` and every sibling branch is complete
/// in turn. A branch that was split in several alternative ways (one per
/// covering set) is complete as soon as any one alternative is.
#[derive(Debug, Clone)]
pub struct MessageTree<M> {
    root_id: MessageId,
    root: Branch,
    messages: Vec<M>,
}

impl<M: Partitioned> MessageTree<M> {
    pub fn new(root: MessageId) -> Self {
        Self {
            root_id: root,
            root: Branch::default(),
            messages: Vec::new(),
        }
    }

    pub fn root_id(&self) -> &MessageId {
        &self.root_id
    }

    /// Add a message. Returns `false`, leaving the tree unchanged, when the
    /// message belongs to another root.
    pub fn add_message(&mut self, message: M) -> bool {
        let mp = message.message_part();
        if mp.root != self.root_id {
            return false;
        }
        let mut branch = &mut self.root;
        for part in &mp.parts {
            let node = branch.splits.entry(part.partition.clone()).or_default();
            node.totals.insert(part.total);
            branch = node.branches.entry(part.index).or_default();
        }
        if branch.terminal.is_none() {
            branch.terminal = Some(self.messages.len());
        }
        self.messages.push(message);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.root.is_complete()
    }

    /// The messages forming one complete alternative, or `None` while the
    /// tree is incomplete. Alternatives are tried in partition-id order.
    pub fn complete_messages(&self) -> Option<Vec<&M>> {
        let mut indices = Vec::new();
        if !self.root.select(&mut indices) {
            return None;
        }
        Some(indices.into_iter().map(|i| &self.messages[i]).collect())
    }

    /// Every complete alternative, up to `limit` of them, in partition-id
    /// order. Empty while the tree is incomplete.
    pub fn alternatives(&self, limit: usize) -> Vec<Vec<&M>> {
        self.root
            .alternatives(limit)
            .into_iter()
            .map(|indices| indices.into_iter().map(|i| &self.messages[i]).collect())
            .collect()
    }

    pub fn messages(&self) -> &[M] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;
    use rand::seq::SliceRandom;

    fn ids() -> IdGenerator {
        IdGenerator::new(PeerId::from("p1"))
    }

    #[test]
    fn split_assigns_shared_partition_and_unique_indices() {
        let ids = ids();
        let root = MessagePart::new(ids.next_message_id());
        let parts = root.split(3, &ids);
        assert_eq!(parts.len(), 3);
        let partition = &parts[0].parts[0].partition;
        for (i, p) in parts.iter().enumerate() {
            assert_eq!(p.root, root.root);
            assert_eq!(p.split_level(), 1);
            assert_eq!(&p.parts[0].partition, partition);
            assert_eq!(p.parts[0].index, i as u32);
            assert_eq!(p.parts[0].total, 3);
        }
        assert!(MessagePart::are_complete(parts.iter().map(|p| &p.parts[0])));
        assert!(!MessagePart::are_complete(parts[..2].iter().map(|p| &p.parts[0])));
    }

    #[test]
    fn all_siblings_complete_the_tree_for_any_k() {
        let ids = ids();
        for k in 1..=6 {
            let root = MessagePart::new(ids.next_message_id());
            let mut siblings = root.split(k, &ids);
            siblings.shuffle(&mut rand::thread_rng());

            let mut tree = MessageTree::new(root.root.clone());
            for (n, s) in siblings.iter().enumerate() {
                assert!(!tree.is_complete(), "k={k} after {n}");
                assert!(tree.add_message(s.clone()));
            }
            assert!(tree.is_complete(), "k={k}");
        }
    }

    #[test]
    fn strict_subsets_are_incomplete() {
        let ids = ids();
        let root = MessagePart::new(ids.next_message_id());
        let siblings = root.split(4, &ids);
        let mut tree = MessageTree::new(root.root.clone());
        tree.add_message(siblings[0].clone());
        tree.add_message(siblings[2].clone());
        tree.add_message(siblings[3].clone());
        // Duplicates do not stand in for the missing sibling.
        tree.add_message(siblings[3].clone());
        assert!(!tree.is_complete());
        tree.add_message(siblings[1].clone());
        assert!(tree.is_complete());
    }

    #[test]
    fn nested_splits_require_every_level() {
        let ids = ids();
        let root = MessagePart::new(ids.next_message_id());
        let first = root.split(2, &ids);
        let nested = first[0].split(2, &ids);

        let mut tree = MessageTree::new(root.root.clone());
        tree.add_message(nested[0].clone());
        tree.add_message(first[1].clone());
        assert!(!tree.is_complete());
        tree.add_message(nested[1].clone());
        assert!(tree.is_complete());
    }

    #[test]
    fn alternative_splits_need_only_one_complete() {
        let ids = ids();
        let root = MessagePart::new(ids.next_message_id());
        let first = root.split(2, &ids);
        let second = root.split(3, &ids);

        let mut tree = MessageTree::new(root.root.clone());
        tree.add_message(second[0].clone());
        tree.add_message(first[0].clone());
        assert!(!tree.is_complete());
        tree.add_message(first[1].clone());
        assert!(tree.is_complete());
    }

    #[test]
    fn complete_messages_pick_one_alternative() {
        let ids = ids();
        let root = MessagePart::new(ids.next_message_id());
        let first = root.split(2, &ids);
        let second = root.split(1, &ids);

        let mut tree = MessageTree::new(root.root.clone());
        tree.add_message(first[0].clone());
        assert!(tree.complete_messages().is_none());
        tree.add_message(second[0].clone());
        tree.add_message(first[1].clone());

        let chosen = tree.complete_messages().unwrap();
        assert_eq!(chosen.len(), 2);
        assert!(chosen.iter().all(|m| m.parts[0].partition == first[0].parts[0].partition));
    }

    #[test]
    fn alternatives_multiply_across_siblings() {
        let ids = ids();
        let root = MessagePart::new(ids.next_message_id());
        let halves = root.split(2, &ids);
        let mut tree = MessageTree::new(root.root.clone());
        // Each half reached the end in two different ways.
        for half in &halves {
            for _ in 0..2 {
                tree.add_message(half.split(1, &ids).remove(0));
            }
        }
        assert_eq!(tree.alternatives(16).len(), 4);
        assert_eq!(tree.alternatives(3).len(), 3);
        assert!(tree.alternatives(16).iter().all(|a| a.len() == 2));
    }

    #[test]
    fn conflicting_totals_never_complete() {
        let ids = ids();
        let root = MessagePart::new(ids.next_message_id());
        let mut siblings = root.split(2, &ids);
        siblings[1].parts[0].total = 3;
        let mut tree = MessageTree::new(root.root.clone());
        for s in siblings {
            tree.add_message(s);
        }
        assert!(!tree.is_complete());
    }

    #[test]
    fn foreign_roots_are_rejected() {
        let ids = ids();
        let a = MessagePart::new(ids.next_message_id());
        let b = MessagePart::new(ids.next_message_id());
        let mut tree = MessageTree::new(a.root.clone());
        assert!(!tree.add_message(b));
        assert!(tree.is_empty());
        assert!(tree.add_message(a));
        assert!(tree.is_complete());
    }
}
