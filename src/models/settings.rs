//! Top-level process configuration.
//!
//! Loaded once at startup from a JSON file (see `config::loader`), validated,
//! and wrapped in an `Arc` shared by every component. Hot-reload (see
//! `config::hot_reload`) swaps this `Arc` wholesale rather than mutating it
//! in place, so in-flight requests always see a consistent generation.

use crate::models::upstream::UpstreamConfig;
use serde::{Deserialize, Serialize};

/// Deferred-queue behavior, global across all upstreams.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QueueSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default = "default_expiry_seconds")]
    pub expiry_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_size() -> usize {
    100
}

fn default_expiry_seconds() -> u64 {
    300
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            enabled: true,
            max_size: default_max_size(),
            expiry_seconds: default_expiry_seconds(),
        }
    }
}

/// Outbound proxy used by the executor's HTTP client, if any.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub address: Option<String>,
}

/// The full gateway configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default = "default_api_path_prefix")]
    pub api_path_prefix: String,
    #[serde(default)]
    pub debug_level: String,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    pub upstreams: Vec<UpstreamConfig>,
}

fn default_version() -> u8 {
    1
}

fn default_api_path_prefix() -> String {
    "api".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            version: default_version(),
            api_path_prefix: default_api_path_prefix(),
            debug_level: "info".to_string(),
            queue: QueueSettings::default(),
            proxy: ProxySettings::default(),
            upstreams: Vec::new(),
        }
    }
}

impl Settings {
    /// Hard validation: the first error aborts startup (see `config::loader`).
    pub fn validate(&self) -> Result<(), String> {
        if self.upstreams.is_empty() {
            return Err("at least one upstream must be configured".to_string());
        }

        let mut seen_names = std::collections::HashSet::new();
        for upstream in &self.upstreams {
            upstream.validate()?;
            if !seen_names.insert(upstream.name.clone()) {
                return Err(format!("duplicate upstream name: {}", upstream.name));
            }
            for alias in &upstream.aliases {
                if !seen_names.insert(alias.clone()) {
                    return Err(format!(
                        "upstream alias '{}' collides with another upstream or alias",
                        alias
                    ));
                }
            }
        }

        if self.queue.max_size == 0 {
            return Err("queue.max_size must be at least 1".to_string());
        }

        Ok(())
    }

    /// Finds the upstream whose name or alias set equals `segment`.
    pub fn find_upstream(&self, segment: &str) -> Option<&UpstreamConfig> {
        self.upstreams
            .iter()
            .find(|u| u.name == segment || u.aliases.iter().any(|a| a == segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upstream::{LoadBalancingStrategy, RateLimitConfig, RetryPolicy};
    use std::collections::HashMap;

    fn sample_upstream(name: &str) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            aliases: vec![],
            endpoint: "https://up.example".into(),
            key_variable: "keys".into(),
            variables: HashMap::from([("keys".to_string(), vec!["k1".to_string()])]),
            headers: HashMap::new(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            timeout_seconds: 30,
            load_balancing_strategy: LoadBalancingStrategy::default(),
            weights: vec![],
            rate_limit_paths: vec!["*".to_string()],
            path_rewrites: vec![],
        }
    }

    #[test]
    fn rejects_empty_upstream_list() {
        let settings = Settings {
            upstreams: vec![],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let settings = Settings {
            upstreams: vec![sample_upstream("oai"), sample_upstream("oai")],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn finds_upstream_by_alias() {
        let mut upstream = sample_upstream("oai");
        upstream.aliases.push("o".to_string());
        let settings = Settings {
            upstreams: vec![upstream],
            ..Settings::default()
        };
        assert!(settings.find_upstream("o").is_some());
        assert!(settings.find_upstream("missing").is_none());
    }
}
