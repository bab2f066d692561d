//! The in-flight inbound request record.
//!
//! One `InboundRequest` is created per client call and lives for exactly one
//! client connection. While parked in the deferred queue its ownership is
//! shared with the reaper under the queue's mutex (see `core::queue`); at
//! all other times it is exclusively owned by the orchestrator task handling
//! it.

use actix_web::http::Method;
use std::time::Instant;
use tokio::sync::oneshot;

use crate::models::error::GatewayError;

/// The side a deferred request resolves through once the reaper has served
/// it (or it has expired / been cleared).
pub type CompletionSender = oneshot::Sender<Result<actix_web::HttpResponse, GatewayError>>;
pub type CompletionReceiver = oneshot::Receiver<Result<actix_web::HttpResponse, GatewayError>>;

/// Everything the orchestrator needs to carry a client call from routing
/// through to response finalization.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    /// The full original path, e.g. `/api/oai/v1/models`.
    pub path: String,
    pub headers: actix_web::http::header::HeaderMap,
    pub body: actix_web::web::Bytes,
    /// Scheme + host the client used to reach the proxy, used for the HTML
    /// `<base href>` rewrite.
    pub original_host: String,
    pub arrival: Instant,

    pub upstream_name: Option<String>,
    pub residual_path: Option<String>,
    pub credential: Option<String>,
    pub attempt: u32,
}

impl InboundRequest {
    pub fn new(
        method: Method,
        path: String,
        headers: actix_web::http::header::HeaderMap,
        body: actix_web::web::Bytes,
        original_host: String,
    ) -> Self {
        InboundRequest {
            method,
            path,
            headers,
            body,
            original_host,
            arrival: Instant::now(),
            upstream_name: None,
            residual_path: None,
            credential: None,
            attempt: 0,
        }
    }
}
