//! Integration coverage for loading and validating configuration from disk.
//!
//! Grounded in the teacher's `config_settings_tests.rs`/`config_validation_tests.rs`
//! style (file fixtures via `tempfile`, `Settings` built in code), rewritten
//! around upstream/credential configuration instead of `Router`/`Backend`.

use nexuspath::config::loader;
use nexuspath::config::validation::ConfigValidator;
use std::io::Write;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn loads_a_well_formed_multi_upstream_config() {
    let file = write_config(
        r#"{
            "api_path_prefix": "api",
            "upstreams": [
                {
                    "name": "oai",
                    "aliases": ["o"],
                    "endpoint": "https://api.openai.com",
                    "key_variable": "keys",
                    "variables": {"keys": ["k1", "k2"]},
                    "rate_limit": {"endpoint": "60/m", "key": "10/m"}
                },
                {
                    "name": "anthropic",
                    "endpoint": "https://api.anthropic.com",
                    "key_variable": "keys",
                    "variables": {"keys": ["a1"]}
                }
            ]
        }"#,
    );

    let settings = loader::load_from_path(file.path().to_str().unwrap()).unwrap();
    assert_eq!(settings.upstreams.len(), 2);
    assert!(settings.find_upstream("o").is_some());
    assert!(settings.find_upstream("anthropic").is_some());
}

#[test]
fn rejects_a_config_with_no_upstreams() {
    let file = write_config(r#"{"api_path_prefix": "api", "upstreams": []}"#);
    let result = loader::load_from_path(file.path().to_str().unwrap());
    assert!(result.is_err());
}

#[test]
fn rejects_an_upstream_whose_key_variable_is_undeclared() {
    let file = write_config(
        r#"{
            "upstreams": [{
                "name": "oai",
                "endpoint": "https://api.openai.com",
                "key_variable": "keys",
                "variables": {"other": ["k1"]}
            }]
        }"#,
    );
    let result = loader::load_from_path(file.path().to_str().unwrap());
    assert!(result.is_err());
}

#[test]
fn soft_validation_warns_on_a_single_credential_with_rotation_retry() {
    let file = write_config(
        r#"{
            "upstreams": [{
                "name": "oai",
                "endpoint": "https://api.openai.com",
                "key_variable": "keys",
                "variables": {"keys": ["only-one"]},
                "retry": {"mode": "rotation", "max_attempts": 3}
            }]
        }"#,
    );
    let settings = loader::load_from_path(file.path().to_str().unwrap()).unwrap();
    let result = ConfigValidator::validate_comprehensive(&settings);
    assert!(result.is_valid);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.to_lowercase().contains("rotation")));
}

#[test]
fn missing_file_surfaces_as_a_startup_error() {
    let result = loader::load_from_path("/no/such/config/for/nexuspath.json");
    assert!(result.is_err());
}
