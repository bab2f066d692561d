//! Template-expands outgoing headers with variable draws.
//!
//! Grounded in the teacher's header-building section of `services/http.rs`
//! (the hop-by-hop filtering and header-copy idiom), generalized here to
//! also resolve `${{name}}` template tokens against a caller-supplied
//! variable map instead of copying headers verbatim.

use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{\{([^}]+)\}\}").unwrap());

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_denied(name: &str) -> bool {
    name == "host"
        || name == "content-length"
        || name == "x-real-ip"
        || name.starts_with("x-forwarded-")
        || HOP_BY_HOP.contains(&name)
}

/// Returns every distinct `${{name}}` token referenced across all templates.
pub fn referenced_variables(templates: &HashMap<String, String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for template in templates.values() {
        for cap in TOKEN.captures_iter(template) {
            let name = cap[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Substitutes every `${{name}}` token in `template` using `variables`.
/// An unresolved token is left as the literal token and logged at warn.
fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for cap in TOKEN.captures_iter(template) {
        let whole = cap.get(0).unwrap();
        out.push_str(&template[last..whole.start()]);
        let name = &cap[1];
        match variables.get(name) {
            Some(value) => out.push_str(value),
            None => {
                warn!("unresolved header template variable '{}'", name);
                out.push_str(whole.as_str());
            }
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    out
}

/// Builds the outgoing header map: original headers (lowercased, denylisted
/// entries dropped) overlaid with template-derived headers, and
/// `Accept-Encoding` forced to `identity`.
pub fn process(
    templates: &HashMap<String, String>,
    variables: &HashMap<String, String>,
    original: &HeaderMap,
) -> HeaderMap {
    let mut outgoing = HeaderMap::new();

    for (name, value) in original.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if is_denied(&lower) {
            continue;
        }
        if let Ok(header_name) = HeaderName::from_bytes(lower.as_bytes()) {
            outgoing.insert(header_name, value.clone());
        }
    }

    for (name, template) in templates {
        let lower = name.to_ascii_lowercase();
        let resolved = substitute(template, variables);
        let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_str(&resolved),
        ) else {
            warn!("header template '{}' produced an invalid header", name);
            continue;
        };
        outgoing.insert(header_name, header_value);
    }

    outgoing.insert(
        HeaderName::from_static("accept-encoding"),
        HeaderValue::from_static("identity"),
    );

    outgoing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_no_templates_reference_variables() {
        let mut original = HeaderMap::new();
        original.insert(
            HeaderName::from_static("x-custom"),
            HeaderValue::from_static("value"),
        );
        original.insert(
            HeaderName::from_static("host"),
            HeaderValue::from_static("client.example"),
        );
        let outgoing = process(&HashMap::new(), &HashMap::new(), &original);
        assert_eq!(outgoing.get("x-custom").unwrap(), "value");
        assert!(outgoing.get("host").is_none());
        assert_eq!(outgoing.get("accept-encoding").unwrap(), "identity");
    }

    #[test]
    fn substitutes_known_token_and_leaves_unknown_literal() {
        let mut templates = HashMap::new();
        templates.insert(
            "authorization".to_string(),
            "Bearer ${{keys}}".to_string(),
        );
        templates.insert("x-trace".to_string(), "${{missing}}".to_string());
        let mut variables = HashMap::new();
        variables.insert("keys".to_string(), "k1".to_string());

        let outgoing = process(&templates, &variables, &HeaderMap::new());
        assert_eq!(outgoing.get("authorization").unwrap(), "Bearer k1");
        assert_eq!(outgoing.get("x-trace").unwrap(), "${{missing}}");
    }

    #[test]
    fn drops_denylisted_and_hop_by_hop_headers() {
        let mut original = HeaderMap::new();
        original.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("1.2.3.4"),
        );
        original.insert(
            HeaderName::from_static("connection"),
            HeaderValue::from_static("keep-alive"),
        );
        let outgoing = process(&HashMap::new(), &HashMap::new(), &original);
        assert!(outgoing.get("x-forwarded-for").is_none());
        assert!(outgoing.get("connection").is_none());
    }
}
