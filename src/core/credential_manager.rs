//! Composes one selector and one set of rate limiters per upstream.
//!
//! Built once per configuration generation from `Settings`, alongside the
//! teacher's habit (see `models/router.rs`'s `Router`) of building typed,
//! validated state once at load time rather than re-deriving it per request.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;

use crate::core::load_balancer::Selector;
use crate::core::rate_limiter::RateLimiter;
use crate::models::error::GatewayError;
use crate::models::settings::Settings;
use crate::models::upstream::UpstreamConfig;

struct UpstreamCredentials {
    credentials: Vec<String>,
    selector: Selector,
    endpoint_limiter: RateLimiter,
    key_limiters: Vec<RateLimiter>,
    variable_values: HashMap<String, Vec<String>>,
    variable_selectors: HashMap<String, Selector>,
    /// Guards the draw loop in `get_available_key`; held only across cheap
    /// selector draws and limiter checks, never across I/O.
    selection_lock: Mutex<()>,
}

/// Process-wide, keyed by the upstream's canonical name (not alias — the
/// router resolves aliases before anything here is consulted).
pub struct CredentialManager {
    upstreams: HashMap<String, UpstreamCredentials>,
}

impl CredentialManager {
    pub fn new(settings: &Settings) -> Result<Self, GatewayError> {
        let mut upstreams = HashMap::new();
        for upstream in &settings.upstreams {
            upstreams.insert(upstream.name.clone(), build_upstream_state(upstream)?);
        }
        Ok(CredentialManager { upstreams })
    }

    fn state(&self, upstream: &str) -> Result<&UpstreamCredentials, GatewayError> {
        self.upstreams
            .get(upstream)
            .ok_or_else(|| GatewayError::ConfigError {
                message: format!("no credential state for upstream '{}'", upstream),
            })
    }

    pub fn is_api_available(&self, upstream: &str) -> Result<bool, GatewayError> {
        Ok(!self.state(upstream)?.endpoint_limiter.is_rate_limited())
    }

    pub fn has_available_keys(&self, upstream: &str) -> Result<bool, GatewayError> {
        let state = self.state(upstream)?;
        Ok(state.key_limiters.iter().any(|l| !l.is_rate_limited()))
    }

    /// Draws up to `|credentials|` candidates under the selection lock,
    /// returning the first whose limiter admits. With `apply_rl = false`
    /// the first draw is returned unconditionally (used for rotation's
    /// best-effort fallback).
    pub fn get_available_key(
        &self,
        upstream: &str,
        apply_rl: bool,
    ) -> Result<String, GatewayError> {
        let state = self.state(upstream)?;
        let _guard = state.selection_lock.lock().unwrap();

        if !apply_rl {
            let idx = state.selector.next();
            return Ok(state.credentials[idx].clone());
        }

        for _ in 0..state.credentials.len() {
            let idx = state.selector.next();
            if state.key_limiters[idx].allow() {
                return Ok(state.credentials[idx].clone());
            }
        }
        Err(GatewayError::KeyExhausted {
            upstream: upstream.to_string(),
        })
    }

    /// Draws a value for a non-key template variable (header substituter).
    pub fn draw_variable(&self, upstream: &str, variable: &str) -> Result<String, GatewayError> {
        let state = self.state(upstream)?;
        let values = state
            .variable_values
            .get(variable)
            .ok_or_else(|| GatewayError::ConfigError {
                message: format!("upstream '{}' has no variable '{}'", upstream, variable),
            })?;
        if values.is_empty() {
            return Err(GatewayError::ConfigError {
                message: format!("upstream '{}' variable '{}' has no values", upstream, variable),
            });
        }
        let selector = state.variable_selectors.get(variable).ok_or_else(|| {
            GatewayError::ConfigError {
                message: format!("no selector for upstream '{}' variable '{}'", upstream, variable),
            }
        })?;
        Ok(values[selector.next()].clone())
    }

    /// Looks up the index of `credential` among this upstream's credentials;
    /// used to forward retry/rotation outcomes to the correct limiter.
    fn credential_index(state: &UpstreamCredentials, credential: &str) -> Option<usize> {
        state.credentials.iter().position(|c| c == credential)
    }

    pub fn mark_rate_limited(&self, upstream: &str, credential: &str, seconds: f64) {
        let Ok(state) = self.state(upstream) else {
            return;
        };
        match Self::credential_index(state, credential) {
            Some(idx) => state.key_limiters[idx].mark_rate_limited(seconds),
            None => warn!(
                "mark_rate_limited: credential not found for upstream '{}'",
                upstream
            ),
        }
    }

    pub fn mark_endpoint_rate_limited(&self, upstream: &str, seconds: f64) {
        if let Ok(state) = self.state(upstream) {
            state.endpoint_limiter.mark_rate_limited(seconds);
        }
    }

    pub fn get_api_rate_limit_reset(&self, upstream: &str, default: u64) -> u64 {
        self.state(upstream)
            .map(|s| s.endpoint_limiter.reset_time())
            .unwrap_or(default)
    }

    /// Minimum reset across per-credential limiters: time until *some*
    /// credential frees up.
    pub fn get_key_rate_limit_reset(&self, upstream: &str) -> u64 {
        let Ok(state) = self.state(upstream) else {
            return 0;
        };
        state
            .key_limiters
            .iter()
            .map(|l| l.reset_time())
            .min()
            .unwrap_or(0)
    }

    pub fn record_response_time(&self, upstream: &str, credential: &str, seconds: f64) {
        if let Ok(state) = self.state(upstream) {
            if let Some(idx) = Self::credential_index(state, credential) {
                state.selector.record_response_time(idx, seconds);
            }
        }
    }

    pub fn record_started(&self, upstream: &str, credential: &str) {
        if let Ok(state) = self.state(upstream) {
            if let Some(idx) = Self::credential_index(state, credential) {
                state.selector.record_started(idx);
            }
        }
    }

    pub fn record_completed(&self, upstream: &str, credential: &str) {
        if let Ok(state) = self.state(upstream) {
            if let Some(idx) = Self::credential_index(state, credential) {
                state.selector.record_completed(idx);
            }
        }
    }

    /// Clears per-credential limiters for one upstream, or every upstream
    /// when `upstream` is `None`.
    pub fn reset_rate_limits(&self, upstream: Option<&str>) {
        match upstream {
            Some(name) => {
                if let Ok(state) = self.state(name) {
                    state.endpoint_limiter.reset();
                    for limiter in &state.key_limiters {
                        limiter.reset();
                    }
                }
            }
            None => {
                for state in self.upstreams.values() {
                    state.endpoint_limiter.reset();
                    for limiter in &state.key_limiters {
                        limiter.reset();
                    }
                }
            }
        }
    }
}

fn build_upstream_state(upstream: &UpstreamConfig) -> Result<UpstreamCredentials, GatewayError> {
    let credentials = upstream.credentials().to_vec();
    let selector = Selector::new(
        upstream.load_balancing_strategy,
        credentials.len(),
        upstream.weights.clone(),
    )?;
    let key_limiters = credentials
        .iter()
        .map(|_| RateLimiter::new(upstream.rate_limit.key))
        .collect();

    let mut variable_values = HashMap::new();
    let mut variable_selectors = HashMap::new();
    for (name, values) in &upstream.variables {
        if name == &upstream.key_variable {
            continue;
        }
        variable_selectors.insert(
            name.clone(),
            Selector::new(upstream.load_balancing_strategy, values.len(), vec![])?,
        );
        variable_values.insert(name.clone(), values.clone());
    }

    Ok(UpstreamCredentials {
        credentials,
        selector,
        endpoint_limiter: RateLimiter::new(upstream.rate_limit.endpoint),
        key_limiters,
        variable_values,
        variable_selectors,
        selection_lock: Mutex::new(()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::Settings;
    use crate::models::upstream::{LoadBalancingStrategy, RateLimitConfig, RateLimitSpec, RetryPolicy};
    use std::collections::HashMap as Map;

    fn settings_with(credentials: Vec<&str>, key_limit: RateLimitSpec) -> Settings {
        let mut variables = Map::new();
        variables.insert(
            "keys".to_string(),
            credentials.into_iter().map(String::from).collect(),
        );
        Settings {
            upstreams: vec![UpstreamConfig {
                name: "oai".into(),
                aliases: vec![],
                endpoint: "https://up.example".into(),
                key_variable: "keys".into(),
                variables,
                headers: Map::new(),
                rate_limit: RateLimitConfig {
                    endpoint: RateLimitSpec::UNLIMITED,
                    key: key_limit,
                },
                retry: RetryPolicy::default(),
                timeout_seconds: 30,
                load_balancing_strategy: LoadBalancingStrategy::RoundRobin,
                weights: vec![],
                rate_limit_paths: vec!["*".into()],
                path_rewrites: vec![],
            }],
            ..Settings::default()
        }
    }

    #[test]
    fn exhausts_when_every_credential_is_limited() {
        let settings = settings_with(
            vec!["k1", "k2"],
            RateLimitSpec {
                capacity: 1,
                window_seconds: 60,
            },
        );
        let manager = CredentialManager::new(&settings).unwrap();
        assert!(manager.get_available_key("oai", true).is_ok());
        assert!(manager.get_available_key("oai", true).is_ok());
        assert!(matches!(
            manager.get_available_key("oai", true),
            Err(GatewayError::KeyExhausted { .. })
        ));
    }

    #[test]
    fn reset_rate_limits_restores_availability() {
        let settings = settings_with(
            vec!["k1"],
            RateLimitSpec {
                capacity: 1,
                window_seconds: 60,
            },
        );
        let manager = CredentialManager::new(&settings).unwrap();
        manager.get_available_key("oai", true).unwrap();
        assert!(!manager.has_available_keys("oai").unwrap());
        manager.reset_rate_limits(Some("oai"));
        assert!(manager.is_api_available("oai").unwrap());
        assert!(manager.has_available_keys("oai").unwrap());
    }
}
