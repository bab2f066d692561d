//! Process entrypoint: load configuration, build the orchestrator and its
//! collaborators, bind the HTTP server, and watch for a graceful shutdown.
//!
//! Grounded in `kairos-gateway`'s `main.rs` composition order (logger, then
//! settings, then validation, then server bind, then `tokio::select!` against
//! `ctrl_c()`) — reworked around this crate's own collaborators in place of
//! the teacher's route handler / metrics collector / websocket stack.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware::Logger, App, HttpServer};
use log::{error, info};

use nexuspath::config::hot_reload::ConfigWatcher;
use nexuspath::config::loader;
use nexuspath::config::validation::ConfigValidator;
use nexuspath::core::metrics::Metrics;
use nexuspath::core::orchestrator::Orchestrator;
use nexuspath::core::queue::DeferredQueue;
use nexuspath::logs::logger::configure_logger;
use nexuspath::routes::{admin, health, http};

const HOST_ENV: &str = "NEXUSPATH_HOST";
const PORT_ENV: &str = "NEXUSPATH_PORT";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = loader::load_settings().unwrap_or_else(|error| {
        error!("failed to load configuration: {}", error);
        std::process::exit(1);
    });

    info!(
        "starting nexuspath v{} with {} upstream(s)",
        settings.version,
        settings.upstreams.len()
    );

    let validation = ConfigValidator::validate_comprehensive(&settings);
    for warning in &validation.warnings {
        log::warn!("{}", warning);
    }
    for recommendation in &validation.recommendations {
        info!("{}", recommendation);
    }
    if !validation.is_valid {
        for error in &validation.errors {
            error!("{}", error);
        }
        std::process::exit(1);
    }

    let settings = Arc::new(settings);
    let metrics = Arc::new(Metrics::default());
    let queue = Arc::new(DeferredQueue::new(
        settings.queue.max_size,
        Duration::from_secs(settings.queue.expiry_seconds),
        metrics.clone(),
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(settings.clone(), queue.clone(), metrics.clone()).unwrap_or_else(
            |error| {
                error!("failed to build orchestrator: {}", error);
                std::process::exit(1);
            },
        ),
    );

    let reaper = queue
        .clone()
        .spawn_reaper(orchestrator.credential_manager(), orchestrator.clone());

    let watcher = Arc::new(ConfigWatcher::new(
        (*settings).clone(),
        loader::config_path(),
    ));
    watcher.start_watching().await;
    let mut config_updates = watcher.subscribe();
    let reload_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        while let Ok(update) = config_updates.recv().await {
            match reload_orchestrator.swap_generation(Arc::new(update.settings)) {
                Ok(()) => info!("configuration reloaded (version {})", update.version),
                Err(error) => error!("rejected reloaded configuration: {}", error),
            }
        }
    });

    let host = std::env::var(HOST_ENV).unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port = std::env::var(PORT_ENV)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    info!("binding on {}:{}", host, port);

    let server_orchestrator = orchestrator.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#,
            ))
            .configure(health::configure_health)
            .configure(admin::configure_admin)
            .configure(|cfg| http::configure_route(cfg, server_orchestrator.clone()))
    })
    .bind((host.as_str(), port))?
    .run();

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped gracefully"),
                Err(error) => error!("server error: {}", error),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal, stopping server...");
        }
    }

    reaper.abort();
    Ok(())
}
