//! Loads and hard-validates the process `Settings` at startup.
//!
//! Grounded in the contract `kairos-gateway`'s entrypoint pulls through
//! `config::settings::load_settings()` (env-var-selected path, panic-worthy
//! failure at startup) — reworked here to return a `Result` the caller maps
//! to exit code 1, rather than an `.expect()` panic, since this binary has
//! its own `GatewayError` to carry the message through.

use std::path::Path;

use crate::models::error::GatewayError;
use crate::models::settings::Settings;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "NEXUSPATH_CONFIG_PATH";

/// Path to load from: `NEXUSPATH_CONFIG_PATH` if set, else the default
/// filename in the current directory.
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Parses and hard-validates the settings file at `path`. The first
/// validation error aborts — this function does not collect warnings; see
/// `config::validation::ConfigValidator` for the soft pass.
pub fn load_from_path(path: &str) -> Result<Settings, GatewayError> {
    if !Path::new(path).exists() {
        return Err(GatewayError::Startup(format!(
            "configuration file not found: {}",
            path
        )));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Startup(format!("reading '{}': {}", path, e)))?;
    let settings: Settings = serde_json::from_str(&raw)
        .map_err(|e| GatewayError::Startup(format!("parsing '{}': {}", path, e)))?;
    settings
        .validate()
        .map_err(|e| GatewayError::Startup(format!("invalid configuration: {}", e)))?;
    Ok(settings)
}

/// Loads from the environment-selected path (see `config_path`).
pub fn load_settings() -> Result<Settings, GatewayError> {
    load_from_path(&config_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> &'static str {
        r#"{
            "api_path_prefix": "api",
            "upstreams": [{
                "name": "oai",
                "endpoint": "https://up.example",
                "key_variable": "keys",
                "variables": {"keys": ["k1"]}
            }]
        }"#
    }

    #[test]
    fn loads_and_validates_a_well_formed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_config().as_bytes()).unwrap();
        let settings = load_from_path(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.upstreams.len(), 1);
    }

    #[test]
    fn missing_file_is_a_startup_error() {
        let result = load_from_path("/nonexistent/path/config.json");
        assert!(matches!(result, Err(GatewayError::Startup(_))));
    }

    #[test]
    fn invalid_json_is_a_startup_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        let result = load_from_path(file.path().to_str().unwrap());
        assert!(matches!(result, Err(GatewayError::Startup(_))));
    }
}
