//! The catch-all proxy route: turns an inbound HTTP request into an
//! `InboundRequest` and hands it to the orchestrator.
//!
//! Grounded in the teacher's `configure_route` (single `/{tail:.*}` catch-all
//! resource, payload-size limits, cloned handler shared across requests) —
//! the wiring survives unchanged; only the handler it dispatches to changes.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};

use crate::core::orchestrator::Orchestrator;
use crate::models::request::InboundRequest;

const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

async fn handle(
    req: HttpRequest,
    body: web::Bytes,
    orchestrator: web::Data<Arc<Orchestrator>>,
) -> HttpResponse {
    let connection_info = req.connection_info().clone();
    let original_host = format!("{}://{}", connection_info.scheme(), connection_info.host());

    let request = InboundRequest::new(
        req.method().clone(),
        req.uri().path().to_string(),
        req.headers().clone(),
        body,
        original_host,
    );

    match orchestrator.handle(request).await {
        Ok(response) => response,
        Err(error) => actix_web::ResponseError::error_response(&error),
    }
}

/// Registers the catch-all proxy route. `/health`, `/ready`, `/live` and the
/// admin surface are configured separately (see `routes::health`,
/// `routes::admin`) so they are never shadowed by this resource.
pub fn configure_route(cfg: &mut web::ServiceConfig, orchestrator: Arc<Orchestrator>) {
    cfg.app_data(web::Data::new(orchestrator))
        .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
        .app_data(web::JsonConfig::default().limit(MAX_PAYLOAD_BYTES))
        .service(web::resource("/{tail:.*}").to(handle));
}
