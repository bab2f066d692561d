//! The narrow surface exposed to the dashboard collaborator: queue sizes,
//! queue clearing, and rate-limit reset, plus a metrics read-through.
//!
//! Grounded in the teacher's `routes/management.rs` (decorator-style
//! handlers over `Arc`-shared state, JSON bodies for mutating calls) but
//! scoped down to exactly the interface named in the spec — this crate does
//! not own dashboard authentication; these handlers assume the request
//! already passed whatever auth middleware the dashboard collaborator
//! supplies.

use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::orchestrator::Orchestrator;

#[get("/admin/queue")]
async fn queue_sizes(orchestrator: web::Data<Arc<Orchestrator>>) -> impl Responder {
    HttpResponse::Ok().json(orchestrator.queue().all_queue_sizes())
}

#[post("/admin/queue/clear")]
async fn clear_all_queues(orchestrator: web::Data<Arc<Orchestrator>>) -> impl Responder {
    orchestrator.queue().clear_all();
    HttpResponse::NoContent().finish()
}

#[post("/admin/queue/{upstream}/clear")]
async fn clear_queue(
    upstream: web::Path<String>,
    orchestrator: web::Data<Arc<Orchestrator>>,
) -> impl Responder {
    orchestrator.queue().clear(&upstream);
    HttpResponse::NoContent().finish()
}

#[derive(Deserialize)]
struct ResetRateLimitsBody {
    #[serde(default)]
    upstream: Option<String>,
}

#[post("/admin/rate-limits/reset")]
async fn reset_rate_limits(
    body: web::Json<ResetRateLimitsBody>,
    orchestrator: web::Data<Arc<Orchestrator>>,
) -> impl Responder {
    orchestrator
        .credential_manager()
        .reset_rate_limits(body.upstream.as_deref());
    HttpResponse::NoContent().finish()
}

#[get("/admin/metrics")]
async fn metrics(orchestrator: web::Data<Arc<Orchestrator>>) -> impl Responder {
    HttpResponse::Ok().json(orchestrator.metrics().snapshot())
}

pub fn configure_admin(cfg: &mut web::ServiceConfig) {
    cfg.service(queue_sizes)
        .service(clear_all_queues)
        .service(clear_queue)
        .service(reset_rate_limits)
        .service(metrics);
}
