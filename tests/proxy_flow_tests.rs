//! End-to-end coverage of routing -> credential selection -> execution ->
//! finalization against a real (loopback) upstream.
//!
//! Grounded in the teacher's `integration_tests.rs` approach of standing up
//! an in-process `actix_web::HttpServer` as the thing under test, extended
//! here to also stand up a second server as the mock *upstream*, since this
//! crate's executor issues real `reqwest` calls rather than dispatching to
//! an in-process actix service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::Method;
use actix_web::web::Bytes;
use actix_web::{get, web, App, HttpResponse, HttpServer};

use nexuspath::core::metrics::Metrics;
use nexuspath::core::orchestrator::Orchestrator;
use nexuspath::core::queue::DeferredQueue;
use nexuspath::models::error::GatewayError;
use nexuspath::models::request::InboundRequest;
use nexuspath::models::settings::{QueueSettings, Settings};
use nexuspath::models::upstream::{
    LoadBalancingStrategy, RateLimitConfig, RateLimitSpec, RetryPolicy, UpstreamConfig,
};

#[get("/v1/echo")]
async fn echo() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"ok": true}))
}

async fn spawn_mock_upstream() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(|| App::new().service(echo))
        .listen(listener)
        .unwrap()
        .run();
    tokio::spawn(server);
    format!("http://{}", addr)
}

fn settings_for(endpoint: String, credentials: Vec<&str>) -> Settings {
    let mut variables = HashMap::new();
    variables.insert(
        "keys".to_string(),
        credentials.into_iter().map(String::from).collect(),
    );
    let upstream = UpstreamConfig {
        name: "mock".to_string(),
        aliases: vec![],
        endpoint,
        key_variable: "keys".to_string(),
        variables,
        headers: HashMap::from([("authorization".to_string(), "Bearer ${{keys}}".to_string())]),
        rate_limit: RateLimitConfig {
            endpoint: RateLimitSpec::UNLIMITED,
            key: RateLimitSpec::UNLIMITED,
        },
        retry: RetryPolicy::default(),
        timeout_seconds: 5,
        load_balancing_strategy: LoadBalancingStrategy::RoundRobin,
        weights: vec![],
        rate_limit_paths: vec!["*".to_string()],
        path_rewrites: vec![],
    };
    Settings {
        version: 1,
        api_path_prefix: "api".to_string(),
        debug_level: "info".to_string(),
        queue: QueueSettings::default(),
        proxy: Default::default(),
        upstreams: vec![upstream],
    }
}

fn build_orchestrator(settings: Settings) -> Arc<Orchestrator> {
    let settings = Arc::new(settings);
    let metrics = Arc::new(Metrics::default());
    let queue = Arc::new(DeferredQueue::new(10, Duration::from_secs(5), metrics.clone()));
    Arc::new(Orchestrator::new(settings, queue, metrics).unwrap())
}

#[tokio::test]
async fn proxies_a_request_through_to_the_upstream_and_back() {
    let endpoint = spawn_mock_upstream().await;
    let orchestrator = build_orchestrator(settings_for(endpoint, vec!["secret-key"]));

    let request = InboundRequest::new(
        Method::GET,
        "/api/mock/v1/echo".to_string(),
        actix_web::http::header::HeaderMap::new(),
        Bytes::new(),
        "http://gateway.local".to_string(),
    );

    let response = orchestrator.handle(request).await.unwrap();
    assert_eq!(response.status(), actix_web::http::StatusCode::OK);
}

#[tokio::test]
async fn unknown_upstream_segment_is_rejected_before_any_network_call() {
    let orchestrator = build_orchestrator(settings_for(
        "http://127.0.0.1:1".to_string(),
        vec!["secret-key"],
    ));

    let request = InboundRequest::new(
        Method::GET,
        "/api/not-configured/v1/echo".to_string(),
        actix_web::http::header::HeaderMap::new(),
        Bytes::new(),
        "http://gateway.local".to_string(),
    );

    let error = orchestrator.handle(request).await.unwrap_err();
    assert!(matches!(error, GatewayError::UnknownUpstream { .. }));
}

#[tokio::test]
async fn key_exhaustion_without_a_queue_surfaces_immediately() {
    let endpoint = spawn_mock_upstream().await;
    let mut settings = settings_for(endpoint, vec!["secret-key"]);
    settings.upstreams[0].rate_limit.key = RateLimitSpec::parse("1/m");
    settings.queue.enabled = false;
    let orchestrator = build_orchestrator(settings);

    let make_request = || {
        InboundRequest::new(
            Method::GET,
            "/api/mock/v1/echo".to_string(),
            actix_web::http::header::HeaderMap::new(),
            Bytes::new(),
            "http://gateway.local".to_string(),
        )
    };

    let first = orchestrator.handle(make_request()).await;
    assert!(first.is_ok());

    let second = orchestrator.handle(make_request()).await;
    assert!(matches!(second, Err(GatewayError::KeyExhausted { .. })));
}
