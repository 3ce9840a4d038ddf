use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::types::{Parameter, ParameterKind, Service};

/// Errors returned when a parameter identifier is malformed.
#[derive(Debug, Error, PartialEq)]
pub enum ParameterError {
    #[error("parameter must match I-<concept> or O-<concept>, got: {0:?}")]
    InvalidFormat(String),

    #[error("parameter concept must not contain whitespace, got: {0:?}")]
    InvalidConcept(String),
}

/// Errors returned when a service description fails validation.
#[derive(Debug, Error, PartialEq)]
pub enum ServiceError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("service peer must not be empty")]
    EmptyPeer,

    #[error("service name {0:?} uses a reserved INIT/GOAL form")]
    ReservedName(String),

    #[error("parameter at index {0} is invalid: {1}")]
    InvalidParameter(usize, ParameterError),
}

static PARAMETER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([IO])-(.+)$").expect("invalid parameter regex"));

/// Parse the textual `I-<concept>` / `O-<concept>` form of a parameter.
///
/// The concept part must be non-empty and free of whitespace; it is used
/// verbatim as the taxonomy identifier.
pub fn parse_parameter(s: &str) -> Result<Parameter, ParameterError> {
    let caps = PARAMETER_RE
        .captures(s)
        .ok_or_else(|| ParameterError::InvalidFormat(s.to_string()))?;

    let kind = match &caps[1] {
        "I" => ParameterKind::Input,
        _ => ParameterKind::Output,
    };
    let concept = &caps[2];
    if concept.chars().any(char::is_whitespace) {
        return Err(ParameterError::InvalidConcept(concept.to_string()));
    }

    Ok(Parameter {
        kind,
        id: concept.to_string(),
    })
}

/// Parse a list of textual parameters, reporting the first bad index.
pub fn parse_parameters<'a>(
    items: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Parameter>, ServiceError> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, s)| parse_parameter(s).map_err(|e| ServiceError::InvalidParameter(i, e)))
        .collect()
}

/// Validate a user-supplied service description.
///
/// Synthesized INIT/GOAL names are rejected so that ordinary services can
/// never be mistaken for search endpoints.
pub fn validate_service(service: &Service) -> Result<(), ServiceError> {
    if service.name.is_empty() {
        return Err(ServiceError::EmptyName);
    }
    if service.peer.as_str().is_empty() {
        return Err(ServiceError::EmptyPeer);
    }
    if crate::composition::is_init(service) || crate::composition::is_goal(service) {
        return Err(ServiceError::ReservedName(service.name.clone()));
    }
    for (i, p) in service.parameters.iter().enumerate() {
        if p.id.is_empty() {
            return Err(ServiceError::InvalidParameter(
                i,
                ParameterError::InvalidFormat(p.to_string()),
            ));
        }
        if p.id.chars().any(char::is_whitespace) {
            return Err(ServiceError::InvalidParameter(
                i,
                ParameterError::InvalidConcept(p.id.clone()),
            ));
        }
    }
    Ok(())
}
