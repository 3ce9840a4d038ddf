//! Core model of the svcompose service-composition middleware.
//!
//! This crate holds everything a peer reasons about without doing any I/O:
//! parameters and services, the concept taxonomy, collision detection, the
//! AND-OR service dependency graph, the split/merge message trees of the
//! backward search, covering sets, and shortest-path selection. It is the
//! foundation for the `svcompose-wire` message layer, the `svcompose-node`
//! runtime, and the `svcompose` CLI.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Core data types: [`PeerId`], [`Parameter`], [`Service`], [`ServiceDistance`] |
//! | [`ids`] | [`SearchId`], [`MessageId`], and the per-peer [`IdGenerator`] |
//! | [`validation`] | Parameter parsing and service checks |
//! | [`taxonomy`] | The [`Taxonomy`] seam and [`BasicTaxonomy`] |
//! | [`collision`] | Incremental collision detection via [`detect`] |
//! | [`graph`] | Arena-backed AND-OR [`ServiceGraph`] |
//! | [`sdg`] | Per-peer [`ServiceDependencyGraph`] with remote disclosures |
//! | [`composition`] | INIT/GOAL pseudo-services |
//! | [`message_tree`] | [`MessagePart`] splitting and [`MessageTree`] completeness |
//! | [`covering`] | Minimal covering sets of a service's ancestors |
//! | [`shortest_path`] | [`ShortestPathCalculator`] |
//! | [`render`] | Human-readable text rendering |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::collections::BTreeSet;
//! use svcompose::{detect, BasicTaxonomy, Parameter};
//!
//! let mut tax = BasicTaxonomy::new("Thing");
//! tax.add("A", "Thing")?;
//! tax.add("B", "A")?;
//!
//! let new: BTreeSet<_> = [Parameter::output("B")].into_iter().collect();
//! let mut all = new.clone();
//! all.insert(Parameter::input("A"));
//!
//! // I-A is satisfiable by O-B.
//! assert_eq!(detect(&new, &all, true, &tax).len(), 1);
//! ```

pub mod collision;
pub mod composition;
pub mod covering;
pub mod graph;
pub mod ids;
pub mod message_tree;
pub mod render;
pub mod sdg;
pub mod shortest_path;
pub mod taxonomy;
pub mod types;
pub mod validation;

pub use collision::{detect, Collision, Inhibition};
pub use covering::{covering_sets, CoveringSet};
pub use graph::ServiceGraph;
pub use ids::{IdGenerator, MessageId, SearchId};
pub use message_tree::{MessagePart, MessageTree, Part, Partitioned};
pub use sdg::{IndirectRoute, LostConnections, RouteId, SdgError, ServiceDependencyGraph};
pub use shortest_path::{ShortestPath, ShortestPathCalculator};
pub use taxonomy::{BasicTaxonomy, Taxonomy, TaxonomyDocument, TaxonomyError};
pub use types::{DistanceTable, Parameter, ParameterKind, PeerId, Service, ServiceDistance};
pub use validation::{parse_parameter, validate_service, ParameterError, ServiceError};
