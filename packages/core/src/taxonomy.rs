//! Taxonomy access.
//!
//! Parameters are matched through a concept taxonomy. The middleware only
//! needs two questions answered, both over concept identifiers:
//!
//! | Query | Meaning |
//! |-------|---------|
//! | `subsumes(a, b)` | `a` is `b` or one of its ancestors |
//! | `related(a, b)` | either concept subsumes the other |
//!
//! [`Taxonomy`] is the seam; [`BasicTaxonomy`] is a single-rooted concept
//! tree loaded from JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Query interface over a concept taxonomy.
pub trait Taxonomy: Send + Sync {
    /// True when `a` is `b` or an ancestor of `b`.
    fn subsumes(&self, a: &str, b: &str) -> bool;

    fn related(&self, a: &str, b: &str) -> bool {
        self.subsumes(a, b) || self.subsumes(b, a)
    }
}

/// Errors raised while building a [`BasicTaxonomy`].
#[derive(Debug, Error, PartialEq)]
pub enum TaxonomyError {
    #[error("concept {concept:?} names unknown parent {parent:?}")]
    UnknownParent { concept: String, parent: String },

    #[error("concept {0:?} is already defined")]
    Duplicate(String),

    #[error("concept {0:?} is part of a cycle")]
    Cycle(String),
}

/// JSON form of a taxonomy: a root concept and a child → parent map.
///
/// ```json
/// { "root": "Thing", "parents": { "A": "Thing", "B": "A", "D": "B" } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyDocument {
    pub root: String,
    #[serde(default)]
    pub parents: BTreeMap<String, String>,
}

/// A single-rooted tree of concepts.
#[derive(Debug, Clone)]
pub struct BasicTaxonomy {
    root: String,
    parents: BTreeMap<String, String>,
}

impl BasicTaxonomy {
    /// A taxonomy containing only `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            parents: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Add `concept` below `parent`. The parent must already exist.
    pub fn add(
        &mut self,
        concept: impl Into<String>,
        parent: impl Into<String>,
    ) -> Result<(), TaxonomyError> {
        let concept = concept.into();
        let parent = parent.into();
        if self.contains(&concept) {
            return Err(TaxonomyError::Duplicate(concept));
        }
        if !self.contains(&parent) {
            return Err(TaxonomyError::UnknownParent { concept, parent });
        }
        self.parents.insert(concept, parent);
        Ok(())
    }

    pub fn contains(&self, concept: &str) -> bool {
        concept == self.root || self.parents.contains_key(concept)
    }

    /// Number of concepts, root included.
    pub fn len(&self) -> usize {
        self.parents.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Build from a [`TaxonomyDocument`], checking that every chain ends at
    /// the root.
    pub fn from_document(doc: TaxonomyDocument) -> Result<Self, TaxonomyError> {
        if doc.parents.contains_key(&doc.root) {
            return Err(TaxonomyError::Duplicate(doc.root));
        }
        for (concept, parent) in &doc.parents {
            if parent != &doc.root && !doc.parents.contains_key(parent) {
                return Err(TaxonomyError::UnknownParent {
                    concept: concept.clone(),
                    parent: parent.clone(),
                });
            }
        }
        let limit = doc.parents.len() + 1;
        for concept in doc.parents.keys() {
            let mut current = concept;
            let mut steps = 0;
            while current != &doc.root {
                steps += 1;
                if steps > limit {
                    return Err(TaxonomyError::Cycle(concept.clone()));
                }
                match doc.parents.get(current) {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
        Ok(Self {
            root: doc.root,
            parents: doc.parents,
        })
    }

    pub fn to_document(&self) -> TaxonomyDocument {
        TaxonomyDocument {
            root: self.root.clone(),
            parents: self.parents.clone(),
        }
    }
}

impl Taxonomy for BasicTaxonomy {
    fn subsumes(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        // Chains are acyclic by construction, so the walk terminates.
        let mut current = b;
        while let Some(parent) = self.parents.get(current) {
            if parent == a {
                return true;
            }
            current = parent;
        }
        false
    }
}
