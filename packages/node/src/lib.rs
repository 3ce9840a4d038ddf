//! Public surface for the `svcompose-node` crate.
//!
//! A [`CompositionPeer`] owns one peer's part of the distributed service
//! dependency graph and runs composition searches over it. Delivery and
//! parameter dissemination are supplied through the [`Transport`] and
//! [`Dissemination`] traits; [`LocalNetwork`] implements both in-process so
//! that tests, the conformance suite and the CLI can run whole overlays
//! without sockets.

pub mod collaborators;
pub mod config;
pub mod creator;
pub mod error;
pub mod listener;
pub mod network;
pub mod notify;
pub mod peer;
pub mod scenario;
pub mod search;
pub mod sweeper;
pub mod tables;

pub use collaborators::{Dissemination, Route, Transport};
pub use config::{NodeConfig, SearchMode};
pub use error::{ConfigError, NodeError};
pub use listener::{CompositionEvent, CompositionListener, LoggingListener, RecordingListener};
pub use network::{LocalNetwork, NetworkBuilder};
pub use peer::CompositionPeer;
pub use scenario::{run_scenario, Scenario, ScenarioReport, SearchReport};
pub use sweeper::Sweeper;
pub use tables::SearchStatus;
