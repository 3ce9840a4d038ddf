//! Peer configuration, populated from environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use svcompose::PeerId;

use crate::error::ConfigError;

/// Which composition protocols a peer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Forward,
    Backward,
    Bidirectional,
}

impl SearchMode {
    pub fn runs_forward(self) -> bool {
        matches!(self, SearchMode::Forward | SearchMode::Bidirectional)
    }

    pub fn runs_backward(self) -> bool {
        matches!(self, SearchMode::Backward | SearchMode::Bidirectional)
    }
}

impl FromStr for SearchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(SearchMode::Forward),
            "backward" => Ok(SearchMode::Backward),
            "bidirectional" => Ok(SearchMode::Bidirectional),
            _ => Err(ConfigError::Invalid {
                var: "SVC_SEARCH_MODE",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::Forward => "forward",
            SearchMode::Backward => "backward",
            SearchMode::Bidirectional => "bidirectional",
        })
    }
}

/// Runtime configuration for one peer.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `SVC_PEER_ID` | `peer-0` | Local peer identifier |
/// | `SVC_MAX_TTL` | `32767` | Initial TTL of composition messages |
/// | `SVC_SEARCH_EXPIRATION_MS` | `10000` | Wall-clock budget of a search |
/// | `SVC_SWEEP_INTERVAL_MS` | `1000` | Expiration sweep period |
/// | `SVC_SEARCH_MODE` | `forward` | `forward`, `backward` or `bidirectional` |
/// | `SVC_MULTIPLE_PATHS` | `false` | Relay along up to two routes |
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub peer_id: PeerId,
    pub max_ttl: u32,
    pub search_expiration: Duration,
    pub sweep_interval: Duration,
    pub search_mode: SearchMode,
    pub multiple_paths: bool,
}

impl NodeConfig {
    /// Defaults for `peer`.
    pub fn for_peer(peer: impl Into<String>) -> Self {
        Self {
            peer_id: PeerId::new(peer),
            max_ttl: 32767,
            search_expiration: Duration::from_millis(10_000),
            sweep_interval: Duration::from_millis(1_000),
            search_mode: SearchMode::Forward,
            multiple_paths: false,
        }
    }

    /// Populate config from environment variables, applying defaults where
    /// absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::for_peer(lookup("SVC_PEER_ID").unwrap_or_else(|| "peer-0".into()));

        if let Some(v) = lookup("SVC_MAX_TTL") {
            config.max_ttl = parse("SVC_MAX_TTL", &v)?;
        }
        if let Some(v) = lookup("SVC_SEARCH_EXPIRATION_MS") {
            config.search_expiration = Duration::from_millis(parse("SVC_SEARCH_EXPIRATION_MS", &v)?);
        }
        if let Some(v) = lookup("SVC_SWEEP_INTERVAL_MS") {
            let ms: u64 = parse("SVC_SWEEP_INTERVAL_MS", &v)?;
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    var: "SVC_SWEEP_INTERVAL_MS",
                    value: v,
                });
            }
            config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("SVC_SEARCH_MODE") {
            config.search_mode = v.parse()?;
        }
        if let Some(v) = lookup("SVC_MULTIPLE_PATHS") {
            config.multiple_paths = parse("SVC_MULTIPLE_PATHS", &v)?;
        }
        Ok(config)
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = mode;
        self
    }

    pub fn with_max_ttl(mut self, ttl: u32) -> Self {
        self.max_ttl = ttl;
        self
    }

    pub fn with_search_expiration(mut self, expiration: Duration) -> Self {
        self.search_expiration = expiration;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_multiple_paths(mut self, enabled: bool) -> Self {
        self.multiple_paths = enabled;
        self
    }
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c.peer_id, PeerId::from("peer-0"));
        assert_eq!(c.max_ttl, 32767);
        assert_eq!(c.search_expiration, Duration::from_secs(10));
        assert_eq!(c.sweep_interval, Duration::from_secs(1));
        assert_eq!(c.search_mode, SearchMode::Forward);
        assert!(!c.multiple_paths);
    }

    #[test]
    fn variables_override_defaults() {
        let c = NodeConfig::from_lookup(lookup(&[
            ("SVC_PEER_ID", "p7"),
            ("SVC_MAX_TTL", "4"),
            ("SVC_SEARCH_EXPIRATION_MS", "250"),
            ("SVC_SWEEP_INTERVAL_MS", "50"),
            ("SVC_SEARCH_MODE", "Bidirectional"),
            ("SVC_MULTIPLE_PATHS", "true"),
        ]))
        .unwrap();
        assert_eq!(c.peer_id, PeerId::from("p7"));
        assert_eq!(c.max_ttl, 4);
        assert_eq!(c.search_expiration, Duration::from_millis(250));
        assert_eq!(c.sweep_interval, Duration::from_millis(50));
        assert_eq!(c.search_mode, SearchMode::Bidirectional);
        assert!(c.multiple_paths);
    }

    #[test]
    fn unparseable_values_are_errors() {
        let err = NodeConfig::from_lookup(lookup(&[("SVC_MAX_TTL", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SVC_MAX_TTL", .. }));
        assert!(NodeConfig::from_lookup(lookup(&[("SVC_SEARCH_MODE", "sideways")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("SVC_SWEEP_INTERVAL_MS", "0")])).is_err());
    }

    #[test]
    fn modes_select_protocols() {
        assert!(SearchMode::Forward.runs_forward());
        assert!(!SearchMode::Forward.runs_backward());
        assert!(SearchMode::Bidirectional.runs_forward() && SearchMode::Bidirectional.runs_backward());
        assert_eq!(SearchMode::Backward.to_string(), "backward");
    }
}
