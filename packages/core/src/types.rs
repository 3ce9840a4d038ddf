//! Core data types of the composition model.
//!
//! This module defines the values every other layer exchanges:
//! [`PeerId`], [`Parameter`], [`Service`], and [`ServiceDistance`].
//! All types serialise to and from JSON so they can travel inside wire
//! messages unchanged.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Identifier of a peer in the overlay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

/// Whether a parameter is consumed or produced by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Input,
    Output,
}

impl ParameterKind {
    /// Single-byte tag used by compact encodings.
    pub fn tag(self) -> u8 {
        match self {
            ParameterKind::Input => 0x01,
            ParameterKind::Output => 0x02,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(ParameterKind::Input),
            0x02 => Some(ParameterKind::Output),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            ParameterKind::Input => "I",
            ParameterKind::Output => "O",
        }
    }
}

/// A taxonomy concept tagged as an input or an output.
///
/// Equality and ordering are by `(kind, id)`. The textual form is
/// `I-<concept>` or `O-<concept>`; see [`crate::validation::parse_parameter`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub kind: ParameterKind,
    /// Taxonomy concept identifier.
    pub id: String,
}

impl Parameter {
    pub fn input(id: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::Input,
            id: id.into(),
        }
    }

    pub fn output(id: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::Output,
            id: id.into(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind == ParameterKind::Input
    }

    pub fn is_output(&self) -> bool {
        self.kind == ParameterKind::Output
    }

    /// The same concept with the opposite kind.
    pub fn flipped(&self) -> Self {
        let kind = match self.kind {
            ParameterKind::Input => ParameterKind::Output,
            ParameterKind::Output => ParameterKind::Input,
        };
        Self {
            kind,
            id: self.id.clone(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.prefix(), self.id)
    }
}

/// Parses the `I-<concept>` / `O-<concept>` form.
impl std::str::FromStr for Parameter {
    type Err = crate::validation::ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::validation::parse_parameter(s)
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A service hosted by a peer.
///
/// Identity is `(name, peer)`: two values with the same name and peer are
/// the same service even if their parameter sets differ. The stable string
/// key used by graphs is `name:peer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub peer: PeerId,
    #[serde(default)]
    pub parameters: BTreeSet<Parameter>,
}

impl Service {
    pub fn new(name: impl Into<String>, peer: PeerId) -> Self {
        Self {
            name: name.into(),
            peer,
            parameters: BTreeSet::new(),
        }
    }

    /// Builder-style parameter addition.
    pub fn with(mut self, parameter: Parameter) -> Self {
        self.parameters.insert(parameter);
        self
    }

    pub fn with_inputs<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        for id in ids {
            self.parameters.insert(Parameter::input(id));
        }
        self
    }

    pub fn with_outputs<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        for id in ids {
            self.parameters.insert(Parameter::output(id));
        }
        self
    }

    /// Stable graph key: `name:peer`.
    ///
    /// `:` and `\` in the name are escaped with a backslash, so the first
    /// unescaped `:` always separates name from peer and peers such as
    /// `host:80` stay unambiguous.
    pub fn key(&self) -> String {
        let mut key = String::with_capacity(self.name.len() + self.peer.as_str().len() + 1);
        for c in self.name.chars() {
            if c == ':' || c == '\\' {
                key.push('\\');
            }
            key.push(c);
        }
        key.push(':');
        key.push_str(self.peer.as_str());
        key
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_output())
    }

    pub fn is_local(&self, peer: &PeerId) -> bool {
        &self.peer == peer
    }
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.peer == other.peer
    }
}

impl Eq for Service {}

impl Hash for Service {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.peer.hash(state);
    }
}

impl PartialOrd for Service {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Service {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.name, &self.peer).cmp(&(&other.name, &other.peer))
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.peer)
    }
}

// ---------------------------------------------------------------------------
// ServiceDistance
// ---------------------------------------------------------------------------

/// A service annotated with a hop distance.
///
/// Equality, hashing, and ordering consider only the service, so a set of
/// `ServiceDistance` holds at most one distance per service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDistance {
    pub service: Service,
    pub distance: u32,
}

impl ServiceDistance {
    pub fn new(service: Service, distance: u32) -> Self {
        Self { service, distance }
    }

    pub fn local(service: Service) -> Self {
        Self::new(service, 0)
    }
}

impl PartialEq for ServiceDistance {
    fn eq(&self, other: &Self) -> bool {
        self.service == other.service
    }
}

impl Eq for ServiceDistance {}

impl Hash for ServiceDistance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.service.hash(state);
    }
}

impl PartialOrd for ServiceDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.service.cmp(&other.service)
    }
}

impl fmt::Display for ServiceDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.service, self.distance)
    }
}

// ---------------------------------------------------------------------------
// Distance tables
// ---------------------------------------------------------------------------

/// Per-service neighbour sets with distances, as carried by connect and
/// composition messages.
pub type DistanceTable = BTreeMap<Service, BTreeSet<ServiceDistance>>;

/// Insert `entry` keeping the smaller distance when the service is present.
pub fn insert_min(set: &mut BTreeSet<ServiceDistance>, entry: ServiceDistance) {
    match set.get(&entry) {
        Some(existing) if existing.distance <= entry.distance => {}
        _ => {
            set.replace(entry);
        }
    }
}

/// Merge every row of `other` into `table`, keeping minimal distances.
pub fn merge_tables(table: &mut DistanceTable, other: &DistanceTable) {
    for (service, row) in other {
        let target = table.entry(service.clone()).or_default();
        for entry in row {
            insert_min(target, entry.clone());
        }
    }
}

/// Every service mentioned in a table, as key or as neighbour.
pub fn table_services(table: &DistanceTable) -> BTreeSet<Service> {
    let mut services: BTreeSet<Service> = table.keys().cloned().collect();
    for row in table.values() {
        services.extend(row.iter().map(|sd| sd.service.clone()));
    }
    services
}

/// The bare services of a distance set.
pub fn services_of(set: &BTreeSet<ServiceDistance>) -> BTreeSet<Service> {
    set.iter().map(|sd| sd.service.clone()).collect()
}

/// Serde adapter for maps whose keys are structured values.
///
/// JSON object keys must be strings, so maps keyed by [`Service`] or other
/// structs are written as a sequence of `[key, value]` pairs instead.
///
/// ```rust,ignore
/// #[serde(with = "svcompose::types::entries")]
/// pub successors: DistanceTable,
/// ```
pub mod entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
