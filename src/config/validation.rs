//! Configuration validation beyond hard structural errors.
//!
//! `Settings::validate()` (see `models/settings.rs`) is the hard gate that
//! aborts startup; this module runs a second pass that collects warnings
//! and recommendations a misconfigured-but-technically-valid setup would
//! benefit from. Same `ValidationResult{errors, warnings, recommendations}`
//! shape the teacher's route-oriented validator used, generalized here to
//! upstream descriptors.

use crate::models::settings::Settings;
use log::{info, warn};
use std::collections::HashSet;

/// Result of a validation pass: hard errors, soft warnings, and
/// recommendations, each collected rather than short-circuiting on first
/// hit so a single run surfaces everything wrong at once.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }
}

/// Runs the full soft-validation pass over a loaded, hard-validated
/// `Settings`.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::new();

        Self::validate_basic_structure(settings, &mut result);
        Self::validate_security(settings, &mut result);
        Self::validate_naming(settings, &mut result);
        Self::validate_credential_pools(settings, &mut result);
        Self::log_validation_results(&result);

        result
    }

    fn validate_basic_structure(settings: &Settings, result: &mut ValidationResult) {
        if settings.upstreams.is_empty() {
            result.add_error("no upstreams configured - gateway will reject every request".to_string());
        }

        for upstream in &settings.upstreams {
            if let Err(error) = upstream.validate() {
                result.add_error(error);
            }
        }
    }

    fn validate_security(settings: &Settings, result: &mut ValidationResult) {
        let mut http_count = 0;
        let mut https_count = 0;

        for upstream in &settings.upstreams {
            if upstream.endpoint.starts_with("http://") {
                http_count += 1;
                if !upstream.endpoint.contains("localhost") && !upstream.endpoint.contains("127.0.0.1") {
                    result.add_warning(format!(
                        "upstream '{}' uses an insecure http:// endpoint: {}",
                        upstream.name, upstream.endpoint
                    ));
                }
            } else if upstream.endpoint.starts_with("https://") {
                https_count += 1;
            }

            if upstream.rate_limit.key.is_unlimited() && upstream.credentials().len() == 1 {
                result.add_warning(format!(
                    "upstream '{}' has a single credential with no per-credential rate limit",
                    upstream.name
                ));
            }
        }

        if http_count > 0 && https_count == 0 {
            result.add_warning("all upstreams use http:// - consider https:// for production".to_string());
        }
    }

    fn validate_naming(settings: &Settings, result: &mut ValidationResult) {
        let mut seen: HashSet<&str> = HashSet::new();
        for upstream in &settings.upstreams {
            if !seen.insert(upstream.name.as_str()) {
                result.add_error(format!("duplicate upstream name: {}", upstream.name));
            }
            for alias in &upstream.aliases {
                if !seen.insert(alias.as_str()) {
                    result.add_error(format!(
                        "alias '{}' collides with another upstream or alias",
                        alias
                    ));
                }
            }
        }
    }

    /// Warnings specific to the credential pool shape rather than any
    /// single field's validity.
    fn validate_credential_pools(settings: &Settings, result: &mut ValidationResult) {
        for upstream in &settings.upstreams {
            let pool_size = upstream.credentials().len();

            if pool_size == 1 && upstream.retry.mode == crate::models::upstream::RetryMode::Rotation {
                result.add_warning(format!(
                    "upstream '{}' uses rotation retry mode with only one credential - rotation degrades to a no-op",
                    upstream.name
                ));
            }

            if !upstream.weights.is_empty() && upstream.weights.iter().all(|&w| w == 0) {
                result.add_warning(format!(
                    "upstream '{}' has an all-zero weight vector - weighted selection will fall back to random",
                    upstream.name
                ));
            }

            if pool_size > 1 && upstream.load_balancing_strategy == crate::models::upstream::LoadBalancingStrategy::RoundRobin {
                result.add_recommendation(format!(
                    "upstream '{}' has {} credentials under round_robin - fastest_response or least_requests may balance load better under uneven upstream latency",
                    upstream.name, pool_size
                ));
            }
        }
    }

    fn log_validation_results(result: &ValidationResult) {
        if result.is_valid {
            info!("configuration validation passed");
        } else {
            for error in &result.errors {
                log::error!("validation error: {}", error);
            }
        }
        for warning in &result.warnings {
            warn!("validation warning: {}", warning);
        }
        for recommendation in &result.recommendations {
            info!("recommendation: {}", recommendation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upstream::{LoadBalancingStrategy, RateLimitConfig, RateLimitSpec, RetryMode, RetryPolicy, UpstreamConfig};
    use std::collections::HashMap;

    fn upstream(name: &str, credentials: Vec<&str>) -> UpstreamConfig {
        UpstreamConfig {
            name: name.to_string(),
            aliases: vec![],
            endpoint: "https://up.example".into(),
            key_variable: "keys".into(),
            variables: HashMap::from([(
                "keys".to_string(),
                credentials.into_iter().map(String::from).collect(),
            )]),
            headers: HashMap::new(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            timeout_seconds: 30,
            load_balancing_strategy: LoadBalancingStrategy::default(),
            weights: vec![],
            rate_limit_paths: vec!["*".into()],
            path_rewrites: vec![],
        }
    }

    #[test]
    fn warns_on_single_credential_rotation() {
        let mut u = upstream("oai", vec!["k1"]);
        u.retry.mode = RetryMode::Rotation;
        let settings = Settings {
            upstreams: vec![u],
            ..Settings::default()
        };
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.warnings.iter().any(|w| w.contains("rotation")));
    }

    #[test]
    fn flags_duplicate_names_as_errors() {
        let settings = Settings {
            upstreams: vec![upstream("oai", vec!["k1"]), upstream("oai", vec!["k2"])],
            ..Settings::default()
        };
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
    }

    #[test]
    fn warns_on_unlimited_single_credential() {
        let mut u = upstream("oai", vec!["k1"]);
        u.rate_limit.key = RateLimitSpec::UNLIMITED;
        let settings = Settings {
            upstreams: vec![u],
            ..Settings::default()
        };
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(result.warnings.iter().any(|w| w.contains("no per-credential rate limit")));
    }
}
