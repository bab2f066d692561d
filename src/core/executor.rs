//! Issues the upstream call with retry, rotation and `Retry-After` handling.
//!
//! Grounded in the teacher's `services/http.rs` retry loop (composite
//! timeout, classification of network/timeout failures into synthetic
//! gateway statuses, exponential backoff with jitter), reworked around
//! credential rotation and a caller-supplied header template instead of a
//! fixed backend list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::http::{header::HeaderMap, Method};
use chrono::Utc;
use log::{debug, warn};
use rand::Rng;

use crate::core::credential_manager::CredentialManager;
use crate::core::header_substituter;
use crate::core::metrics::Metrics;
use crate::models::error::GatewayError;
use crate::models::upstream::{RetryMode, UpstreamConfig};

const RETRY_AFTER_CEILING_SECONDS: u64 = 60;

/// Everything the executor needs to mount one outgoing call and retry it.
pub struct ExecutionRequest {
    pub method: Method,
    pub url: String,
    pub original_headers: HeaderMap,
    pub templates: HashMap<String, String>,
    /// Resolved non-key variables plus the initially selected key variable
    /// value; the executor overwrites the key variable entry on rotation.
    pub variables: HashMap<String, String>,
    pub body: actix_web::web::Bytes,
}

fn masked(credential: &str) -> String {
    if credential.len() <= 8 {
        "****".to_string()
    } else {
        format!("{}...{}", &credential[..4], &credential[credential.len() - 4..])
    }
}

fn parse_retry_after(header: &str) -> Option<Duration> {
    if let Ok(seconds) = header.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let parsed = chrono::DateTime::parse_from_rfc2822(header.trim()).ok()?;
    let delta = parsed.with_timezone(&Utc) - Utc::now();
    let seconds = delta.num_seconds();
    if seconds > 0 {
        Some(Duration::from_secs(seconds as u64))
    } else {
        Some(Duration::from_secs(0))
    }
}

enum Outcome {
    Response(reqwest::Response),
    NetworkError,
    TimeoutError,
}

/// Stateless over calls: holds the shared HTTP client and its collaborators.
pub struct Executor {
    client: reqwest::Client,
    credential_manager: Arc<CredentialManager>,
    metrics: Arc<Metrics>,
}

impl Executor {
    pub fn new(credential_manager: Arc<CredentialManager>, metrics: Arc<Metrics>) -> Self {
        Executor {
            client: reqwest::Client::builder()
                .pool_idle_timeout(Duration::from_secs(90))
                .pool_max_idle_per_host(32)
                .build()
                .expect("building the shared reqwest client"),
            credential_manager,
            metrics,
        }
    }

    pub async fn execute(
        &self,
        upstream: &UpstreamConfig,
        request: ExecutionRequest,
        key_variable: &str,
        initial_credential: String,
    ) -> Result<reqwest::Response, GatewayError> {
        let retry = &upstream.retry;
        let method_str = request.method.as_str();
        let max_attempts = if !retry.enabled || !retry.is_retryable_method(method_str) {
            1
        } else {
            retry.max_attempts
        };

        let mut credential = initial_credential;
        let mut variables = request.variables;
        let mut last_error: Option<GatewayError> = None;
        let mut last_response: Option<reqwest::Response> = None;

        for attempt in 1..=max_attempts {
            if retry.mode == RetryMode::Rotation && attempt > 1 {
                match self.credential_manager.get_available_key(&upstream.name, true) {
                    Ok(fresh) => credential = fresh,
                    Err(GatewayError::KeyExhausted { .. }) => {
                        debug!(
                            "rotation: no fresh credential available for '{}', retrying with previous",
                            upstream.name
                        );
                    }
                    Err(other) => return Err(other),
                }
            }
            variables.insert(key_variable.to_string(), credential.clone());

            let headers =
                header_substituter::process(&request.templates, &variables, &request.original_headers);

            self.metrics.record_request(&upstream.name, &credential);
            self.credential_manager.record_started(&upstream.name, &credential);
            debug!(
                "executor: attempt {}/{} upstream='{}' credential='{}'",
                attempt,
                max_attempts,
                upstream.name,
                masked(&credential)
            );

            let started = Instant::now();
            let outcome = self
                .send(&request.method, &request.url, headers, request.body.clone(), upstream.timeout_seconds)
                .await;
            let elapsed = started.elapsed();
            self.credential_manager.record_completed(&upstream.name, &credential);

            match outcome {
                Outcome::Response(response) => {
                    let status = response.status().as_u16();
                    self.metrics
                        .record_response(&upstream.name, &credential, status, elapsed.as_secs_f64());
                    self.metrics.record_key_usage(&upstream.name, &credential, status);

                    if retry.is_retryable_status(status) && attempt < max_attempts {
                        let delay = self.retry_delay(&response, retry, attempt);
                        self.credential_manager.mark_rate_limited(
                            &upstream.name,
                            &credential,
                            delay.as_secs_f64(),
                        );
                        warn!(
                            "executor: retryable status {} from '{}', retrying in {:.2}s",
                            status,
                            upstream.name,
                            delay.as_secs_f64()
                        );
                        last_response = Some(response);
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    self.credential_manager
                        .record_response_time(&upstream.name, &credential, elapsed.as_secs_f64());
                    return Ok(response);
                }
                Outcome::NetworkError | Outcome::TimeoutError => {
                    let error = match outcome {
                        Outcome::TimeoutError => GatewayError::UpstreamTimeout {
                            elapsed_ms: elapsed.as_millis() as u64,
                        },
                        _ => GatewayError::UpstreamConnect {
                            message: format!("failed to reach '{}'", upstream.name),
                        },
                    };
                    if attempt < max_attempts {
                        let delay = self.computed_delay(retry, attempt);
                        self.credential_manager.mark_rate_limited(
                            &upstream.name,
                            &credential,
                            delay.as_secs_f64(),
                        );
                        last_error = Some(error);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    last_error = Some(error);
                }
            }
        }

        if last_response.is_some() {
            return Ok(last_response.unwrap());
        }
        Err(last_error.unwrap_or(GatewayError::ExecutorExhausted))
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        headers: HeaderMap,
        body: actix_web::web::Bytes,
        timeout_seconds: u64,
    ) -> Outcome {
        let reqwest_method = match reqwest::Method::from_bytes(method.as_str().as_bytes()) {
            Ok(m) => m,
            Err(_) => reqwest::Method::GET,
        };
        let mut builder = self
            .client
            .request(reqwest_method, url)
            .timeout(Duration::from_secs(timeout_seconds));
        for (name, value) in headers.iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        if !body.is_empty() {
            builder = builder.body(body.to_vec());
        }

        match builder.send().await {
            Ok(response) => Outcome::Response(response),
            Err(error) if error.is_timeout() => Outcome::TimeoutError,
            Err(_) => Outcome::NetworkError,
        }
    }

    fn retry_delay(
        &self,
        response: &reqwest::Response,
        retry: &crate::models::upstream::RetryPolicy,
        attempt: u32,
    ) -> Duration {
        if let Some(value) = response.headers().get("retry-after").and_then(|v| v.to_str().ok()) {
            if let Some(parsed) = parse_retry_after(value) {
                return parsed.min(Duration::from_secs(RETRY_AFTER_CEILING_SECONDS));
            }
        }
        self.computed_delay(retry, attempt)
    }

    fn computed_delay(&self, retry: &crate::models::upstream::RetryPolicy, attempt: u32) -> Duration {
        let base = retry.base_delay_seconds.max(0.0);
        let seconds = match retry.mode {
            RetryMode::Linear => base,
            RetryMode::Backoff => {
                let jitter = rand::thread_rng().gen_range(0.75..=1.25);
                base * 1.5f64.powi(attempt as i32 - 1) * jitter
            }
            RetryMode::Rotation => base,
        };
        Duration::from_secs_f64(seconds.min(RETRY_AFTER_CEILING_SECONDS as f64))
    }
}
