//! Runtime error types.

use svcompose::{SdgError, ServiceError, TaxonomyError};
use svcompose_wire::WireError;

/// An environment variable that could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Errors surfaced by the per-peer runtime.
///
/// Protocol-level staleness (duplicate messages, unknown searches, services
/// already gone) is never reported here; those cases are no-ops.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("graph error: {0}")]
    Graph(#[from] SdgError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid service: {0}")]
    Service(#[from] ServiceError),

    #[error("invalid taxonomy: {0}")]
    Taxonomy(#[from] TaxonomyError),

    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
