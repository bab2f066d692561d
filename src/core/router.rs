//! Maps an inbound path to `(upstream_name, residual_path)`.
//!
//! Deliberately the simplest component: exact match on the first path
//! segment after the configured prefix, no longest-prefix search. Grounded
//! in the structural shape of the teacher's `models/router.rs` `Router`
//! (a typed descriptor looked up by name), stripped down to the one lookup
//! this system needs.

use crate::models::settings::Settings;

/// `None` covers both "doesn't start with the configured prefix" and
/// "unknown upstream segment" — both surface as a 404 to the client.
pub fn route(settings: &Settings, path: &str) -> Option<(String, String)> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.splitn(3, '/');

    let prefix = parts.next()?;
    if prefix != settings.api_path_prefix {
        return None;
    }

    let segment = parts.next()?;
    let upstream = settings.find_upstream(segment)?;

    let rest = parts.next().unwrap_or("");
    Some((upstream.name.clone(), format!("/{}", rest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upstream::{LoadBalancingStrategy, RateLimitConfig, RetryPolicy, UpstreamConfig};
    use std::collections::HashMap;

    fn settings() -> Settings {
        Settings {
            api_path_prefix: "api".to_string(),
            upstreams: vec![UpstreamConfig {
                name: "oai".into(),
                aliases: vec!["o".into()],
                endpoint: "https://up.example".into(),
                key_variable: "keys".into(),
                variables: HashMap::from([("keys".to_string(), vec!["k1".to_string()])]),
                headers: HashMap::new(),
                rate_limit: RateLimitConfig::default(),
                retry: RetryPolicy::default(),
                timeout_seconds: 30,
                load_balancing_strategy: LoadBalancingStrategy::default(),
                weights: vec![],
                rate_limit_paths: vec!["*".into()],
                path_rewrites: vec![],
            }],
            ..Settings::default()
        }
    }

    #[test]
    fn routes_by_canonical_name() {
        let (upstream, residual) = route(&settings(), "/api/oai/v1/models").unwrap();
        assert_eq!(upstream, "oai");
        assert_eq!(residual, "/v1/models");
    }

    #[test]
    fn routes_by_alias_identically() {
        let (upstream, residual) = route(&settings(), "/api/o/v1/models").unwrap();
        assert_eq!(upstream, "oai");
        assert_eq!(residual, "/v1/models");
    }

    #[test]
    fn empty_residual_becomes_root() {
        let (_, residual) = route(&settings(), "/api/oai").unwrap();
        assert_eq!(residual, "/");
    }

    #[test]
    fn unknown_prefix_or_segment_yields_none() {
        assert!(route(&settings(), "/other/oai/v1").is_none());
        assert!(route(&settings(), "/api/unknown/v1").is_none());
    }
}
