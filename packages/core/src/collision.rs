//! Collision detection.
//!
//! A collision is an (input, output) pair whose concepts are related in the
//! taxonomy, signalling that some service producing the output may feed some
//! service consuming the input. Detection is incremental: only pairs that
//! involve at least one newly added parameter are reported.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::taxonomy::Taxonomy;
use crate::types::{Parameter, PeerId};

/// A taxonomically related (input, output) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Collision {
    pub input: Parameter,
    pub output: Parameter,
}

impl Collision {
    pub fn new(input: Parameter, output: Parameter) -> Self {
        Self { input, output }
    }

    pub fn involves(&self, parameter: &Parameter) -> bool {
        &self.input == parameter || &self.output == parameter
    }
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.input, self.output)
    }
}

/// A collision announced by `detected_by`, suppressing re-detection
/// elsewhere. Identity is the collision alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inhibition {
    pub collision: Collision,
    pub detected_by: PeerId,
}

impl Inhibition {
    pub fn new(collision: Collision, detected_by: PeerId) -> Self {
        Self {
            collision,
            detected_by,
        }
    }
}

impl PartialEq for Inhibition {
    fn eq(&self, other: &Self) -> bool {
        self.collision == other.collision
    }
}

impl Eq for Inhibition {}

impl PartialOrd for Inhibition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Inhibition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.collision.cmp(&other.collision)
    }
}

/// Collisions introduced by `new` against the rest of `all`.
///
/// `old = all − new`. The result covers new outputs × old inputs and old
/// outputs × new inputs, plus new × new when `include_new_x_new` is set.
/// An empty `new` set never yields collisions.
pub fn detect(
    new: &BTreeSet<Parameter>,
    all: &BTreeSet<Parameter>,
    include_new_x_new: bool,
    taxonomy: &dyn Taxonomy,
) -> BTreeSet<Collision> {
    let mut collisions = BTreeSet::new();
    if new.is_empty() {
        return collisions;
    }

    let old: BTreeSet<&Parameter> = all.iter().filter(|p| !new.contains(*p)).collect();
    let new_inputs: Vec<&Parameter> = new.iter().filter(|p| p.is_input()).collect();
    let new_outputs: Vec<&Parameter> = new.iter().filter(|p| p.is_output()).collect();
    let old_inputs: Vec<&Parameter> = old.iter().copied().filter(|p| p.is_input()).collect();
    let old_outputs: Vec<&Parameter> = old.iter().copied().filter(|p| p.is_output()).collect();

    let mut check = |inputs: &[&Parameter], outputs: &[&Parameter]| {
        for input in inputs {
            for output in outputs {
                if taxonomy.related(&input.id, &output.id) {
                    collisions.insert(Collision::new((*input).clone(), (*output).clone()));
                }
            }
        }
    };

    check(&old_inputs, &new_outputs);
    check(&new_inputs, &old_outputs);
    if include_new_x_new {
        check(&new_inputs, &new_outputs);
    }
    collisions
}
