//! Upstream descriptor: the typed, validated record the core operates on.
//!
//! Everything the router, credential manager, executor and finalizer need
//! about one configured API lives here. It is built once at configuration
//! load time and is immutable for the lifetime of a configuration
//! generation — downstream code never touches the raw JSON map again.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a rate limiter's capacity is spent within the request lifecycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Fixed delay between attempts.
    Linear,
    /// Exponential delay with jitter.
    Backoff,
    /// Small fixed delay; each attempt draws a fresh credential.
    Rotation,
}

impl Default for RetryMode {
    fn default() -> Self {
        RetryMode::Backoff
    }
}

/// Credential-selection strategy for an upstream's key variable (and, by
/// extension, any other variable drawn in parallel during header
/// substitution).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    Random,
    LeastRequests,
    FastestResponse,
    Weighted,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::RoundRobin
    }
}

/// `<N>/<unit>` rate-limit spec, parsed once at load time.
///
/// An unlimited spec (`capacity == 0`) always admits; callers should check
/// `is_unlimited()` rather than special-case `window_seconds == 0` to avoid
/// division surprises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSpec {
    pub capacity: u32,
    pub window_seconds: u64,
}

impl RateLimitSpec {
    pub const UNLIMITED: RateLimitSpec = RateLimitSpec {
        capacity: 0,
        window_seconds: 0,
    };

    pub fn is_unlimited(&self) -> bool {
        self.capacity == 0
    }

    /// Parses the spec grammar `<N>/<unit>` where unit is one of `s, m, h, d`.
    /// Empty string, `"0"`, or anything unparsable yields [`Self::UNLIMITED`].
    pub fn parse(raw: &str) -> RateLimitSpec {
        let raw = raw.trim();
        if raw.is_empty() || raw == "0" {
            return Self::UNLIMITED;
        }
        let Some((count_str, unit_str)) = raw.split_once('/') else {
            return Self::UNLIMITED;
        };
        let Ok(capacity) = count_str.trim().parse::<u32>() else {
            return Self::UNLIMITED;
        };
        if capacity == 0 {
            return Self::UNLIMITED;
        }
        let window_seconds = match unit_str.trim() {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            _ => return Self::UNLIMITED,
        };
        RateLimitSpec {
            capacity,
            window_seconds,
        }
    }
}

impl Serialize for RateLimitSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.is_unlimited() {
            return serializer.serialize_str("0");
        }
        let unit = match self.window_seconds {
            1 => "s",
            60 => "m",
            3600 => "h",
            86_400 => "d",
            other => return serializer.serialize_str(&format!("{}/{}s", self.capacity, other)),
        };
        serializer.serialize_str(&format!("{}/{}", self.capacity, unit))
    }
}

impl<'de> Deserialize<'de> for RateLimitSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(RateLimitSpec::parse(&raw))
    }
}

/// Endpoint-level and per-credential rate-limit specs for one upstream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct RateLimitConfig {
    #[serde(default = "unlimited_spec")]
    pub endpoint: RateLimitSpec,
    #[serde(default = "unlimited_spec")]
    pub key: RateLimitSpec,
}

fn unlimited_spec() -> RateLimitSpec {
    RateLimitSpec::UNLIMITED
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            endpoint: RateLimitSpec::UNLIMITED,
            key: RateLimitSpec::UNLIMITED,
        }
    }
}

/// Retry/rotation policy for one upstream.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetryPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: f64,
    #[serde(default)]
    pub mode: RetryMode,
    #[serde(default = "default_retry_status_codes")]
    pub status_codes: Vec<u16>,
    #[serde(default = "default_retry_methods")]
    pub methods: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_retry_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504, 507, 524]
}

fn default_retry_methods() -> Vec<String> {
    vec![
        "GET".to_string(),
        "HEAD".to_string(),
        "PUT".to_string(),
        "DELETE".to_string(),
        "OPTIONS".to_string(),
        "POST".to_string(),
        "PATCH".to_string(),
    ]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            enabled: true,
            max_attempts: default_max_attempts(),
            base_delay_seconds: default_base_delay(),
            mode: RetryMode::default(),
            status_codes: default_retry_status_codes(),
            methods: default_retry_methods(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }

    pub fn is_retryable_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.max_attempts > 10 {
            return Err("retry.max_attempts should not exceed 10".to_string());
        }
        if self.base_delay_seconds < 0.0 {
            return Err("retry.base_delay_seconds cannot be negative".to_string());
        }
        Ok(())
    }
}

/// One configured upstream API.
///
/// `variables` always contains the `key_variable` entry; its values are the
/// credential pool. Other entries are drawn in parallel during header
/// substitution (see `header_substituter`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub endpoint: String,
    pub key_variable: String,
    pub variables: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,
    #[serde(default)]
    pub weights: Vec<u32>,
    #[serde(default = "default_rate_limit_paths")]
    pub rate_limit_paths: Vec<String>,
    #[serde(default)]
    pub path_rewrites: Vec<PathRewrite>,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_rate_limit_paths() -> Vec<String> {
    vec!["*".to_string()]
}

/// One `from` → `to` path-rewrite rule, applied longest-pattern-first.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PathRewrite {
    pub from: String,
    pub to: String,
}

impl UpstreamConfig {
    /// The credential pool: values of the designated key variable.
    pub fn credentials(&self) -> &[String] {
        self.variables
            .get(&self.key_variable)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Rewrites `residual_path` using the longest matching `from` prefix;
    /// identity if no rule matches.
    pub fn rewrite_path(&self, residual_path: &str) -> String {
        let mut best: Option<&PathRewrite> = None;
        for rule in &self.path_rewrites {
            if residual_path.starts_with(rule.from.as_str())
                && best.map_or(true, |b| rule.from.len() > b.from.len())
            {
                best = Some(rule);
            }
        }
        match best {
            Some(rule) => format!("{}{}", rule.to, &residual_path[rule.from.len()..]),
            None => residual_path.to_string(),
        }
    }

    /// Whether `path` falls under any of the glob patterns that require
    /// rate-limit gating. `*` matches everything; a trailing `*` is a
    /// prefix match; anything else is an exact match.
    pub fn is_rate_limited_path(&self, path: &str) -> bool {
        self.rate_limit_paths.iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                path.starts_with(prefix)
            } else {
                path == pattern
            }
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("upstream name cannot be empty".to_string());
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(format!(
                "upstream '{}': endpoint must start with http:// or https://",
                self.name
            ));
        }
        if self.key_variable.trim().is_empty() {
            return Err(format!(
                "upstream '{}': key_variable cannot be empty",
                self.name
            ));
        }
        if !self.variables.contains_key(&self.key_variable) {
            return Err(format!(
                "upstream '{}': key_variable '{}' not present in variables",
                self.name, self.key_variable
            ));
        }
        if self.credentials().is_empty() {
            return Err(format!(
                "upstream '{}': key variable '{}' has no values",
                self.name, self.key_variable
            ));
        }
        if !self.weights.is_empty() && self.weights.len() != self.credentials().len() {
            return Err(format!(
                "upstream '{}': weights length ({}) must match credential count ({})",
                self.name,
                self.weights.len(),
                self.credentials().len()
            ));
        }
        self.retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_limit_grammar() {
        assert_eq!(
            RateLimitSpec::parse("10/m"),
            RateLimitSpec {
                capacity: 10,
                window_seconds: 60
            }
        );
        assert!(RateLimitSpec::parse("0").is_unlimited());
        assert!(RateLimitSpec::parse("").is_unlimited());
        assert!(RateLimitSpec::parse("garbage").is_unlimited());
        assert!(RateLimitSpec::parse("5/x").is_unlimited());
    }

    #[test]
    fn rewrites_longest_prefix_first() {
        let upstream = UpstreamConfig {
            name: "oai".into(),
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
            path_rewrites: vec![
                PathRewrite {
                    from: "/v1".into(),
                    to: "/internal/v1".into(),
                },
                PathRewrite {
                    from: "/v1/models".into(),
                    to: "/internal/models".into(),
                },
            ],
        };
        assert_eq!(
            upstream.rewrite_path("/v1/models/list"),
            "/internal/models/list"
        );
        assert_eq!(upstream.rewrite_path("/v1/chat"), "/internal/v1/chat");
        assert_eq!(upstream.rewrite_path("/other"), "/other");
    }

    #[test]
    fn validate_requires_key_variable_values() {
        let mut upstream = UpstreamConfig {
            name: "oai".into(),
            aliases: vec![],
            endpoint: "https://up.example".into(),
            key_variable: "keys".into(),
            variables: HashMap::new(),
            headers: HashMap::new(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            timeout_seconds: 30,
            load_balancing_strategy: LoadBalancingStrategy::default(),
            weights: vec![],
            rate_limit_paths: vec!["*".to_string()],
            path_rewrites: vec![],
        };
        assert!(upstream.validate().is_err());
        upstream
            .variables
            .insert("keys".to_string(), vec!["k1".to_string()]);
        assert!(upstream.validate().is_ok());
    }
}
