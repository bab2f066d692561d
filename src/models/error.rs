//! Gateway-wide error type with HTTP response mapping.
//!
//! Every variant a component can raise ends up here, and every variant maps
//! to exactly one HTTP status and JSON body. No internal error is allowed to
//! escape the orchestrator untranslated.

use actix_web::HttpResponse;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("not found: {path}")]
    UnknownUpstream { path: String },

    #[error("configuration error: {message}")]
    ConfigError { message: String },

    #[error("all credentials for '{upstream}' are rate-limited")]
    KeyExhausted { upstream: String },

    #[error("endpoint '{upstream}' is rate-limited")]
    EndpointRateLimited { upstream: String },

    #[error("deferred queue for '{upstream}' is full")]
    QueueFull { upstream: String },

    #[error("request expired after waiting {waited_seconds}s for '{upstream}'")]
    RequestExpired {
        upstream: String,
        waited_seconds: u64,
    },

    #[error("upstream timed out after {elapsed_ms}ms")]
    UpstreamTimeout { elapsed_ms: u64 },

    #[error("failed to connect to upstream: {message}")]
    UpstreamConnect { message: String },

    #[error("upstream request failed after all retries")]
    ExecutorExhausted,

    #[error("deferred request was cancelled")]
    Cancelled,

    #[error("startup failed: {0}")]
    Startup(String),
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            GatewayError::UnknownUpstream { .. } => StatusCode::NOT_FOUND,
            GatewayError::ConfigError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::KeyExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::EndpointRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::RequestExpired { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamConnect { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ExecutorExhausted => StatusCode::BAD_GATEWAY,
            GatewayError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Startup(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({ "error": self.to_string() });
        if let GatewayError::UpstreamTimeout { elapsed_ms } = self {
            body["elapsed"] = json!(elapsed_ms);
        }
        HttpResponse::build(self.status_code()).json(body)
    }
}
