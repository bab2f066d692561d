//! Drives one inbound request through routing, gating, execution and
//! finalization — and resumes a dequeued one from header substitution
//! onward once the reaper has assigned it a credential.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use actix_web::HttpResponse;
use log::warn;

use crate::core::credential_manager::CredentialManager;
use crate::core::executor::{ExecutionRequest, Executor};
use crate::core::finalizer;
use crate::core::header_substituter;
use crate::core::metrics::Metrics;
use crate::core::queue::{DeferredQueue, DequeueHandler};
use crate::core::router;
use crate::models::error::GatewayError;
use crate::models::request::InboundRequest;
use crate::models::settings::Settings;
use crate::models::upstream::UpstreamConfig;

/// One configuration generation: the settings it was built from and the
/// credential state derived from them. Swapped as a unit on hot-reload so
/// in-flight requests never see a settings/credential-manager mismatch.
pub struct Generation {
    pub settings: Arc<Settings>,
    pub credential_manager: Arc<CredentialManager>,
}

pub struct Orchestrator {
    generation: RwLock<Arc<Generation>>,
    queue: Arc<DeferredQueue>,
    executor: Arc<Executor>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        queue: Arc<DeferredQueue>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, GatewayError> {
        let credential_manager = Arc::new(CredentialManager::new(&settings)?);
        let executor = Arc::new(Executor::new(credential_manager.clone(), metrics.clone()));
        Ok(Orchestrator {
            generation: RwLock::new(Arc::new(Generation {
                settings,
                credential_manager,
            })),
            queue,
            executor,
            metrics,
        })
    }

    /// Rebuilds credential state from `settings` and atomically swaps the
    /// live generation. Called by the config hot-reload watcher after a
    /// new file has already passed validation.
    pub fn swap_generation(&self, settings: Arc<Settings>) -> Result<(), GatewayError> {
        let credential_manager = Arc::new(CredentialManager::new(&settings)?);
        *self.generation.write().unwrap() = Arc::new(Generation {
            settings,
            credential_manager,
        });
        Ok(())
    }

    pub fn current_settings(&self) -> Arc<Settings> {
        self.generation.read().unwrap().settings.clone()
    }

    pub fn credential_manager(&self) -> Arc<CredentialManager> {
        self.generation.read().unwrap().credential_manager.clone()
    }

    pub fn queue(&self) -> Arc<DeferredQueue> {
        self.queue.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    fn generation(&self) -> Arc<Generation> {
        self.generation.read().unwrap().clone()
    }

    /// The full path for a freshly-arrived request: route, gate, select,
    /// execute, finalize (or park in the deferred queue).
    pub async fn handle(&self, mut request: InboundRequest) -> Result<HttpResponse, GatewayError> {
        let generation = self.generation();
        let settings = generation.settings.clone();

        let (upstream_name, residual) = router::route(&settings, &request.path).ok_or_else(|| {
            GatewayError::UnknownUpstream {
                path: request.path.clone(),
            }
        })?;
        let upstream = settings
            .upstreams
            .iter()
            .find(|u| u.name == upstream_name)
            .cloned()
            .expect("router only returns names present in settings");

        request.upstream_name = Some(upstream_name.clone());
        request.residual_path = Some(residual);

        if !upstream.is_rate_limited_path(request.residual_path.as_deref().unwrap_or("/")) {
            let credential = generation
                .credential_manager
                .get_available_key(&upstream_name, false)?;
            return self
                .process_with_credential(&generation, &upstream, &upstream_name, credential, request)
                .await;
        }

        let api_available = generation.credential_manager.is_api_available(&upstream_name)?;
        let has_keys = generation.credential_manager.has_available_keys(&upstream_name)?;

        if !api_available || !has_keys {
            self.metrics.record_rate_limit_hit(&upstream_name);
            if !settings.queue.enabled {
                return Err(if !has_keys {
                    GatewayError::KeyExhausted {
                        upstream: upstream_name,
                    }
                } else {
                    GatewayError::EndpointRateLimited {
                        upstream: upstream_name,
                    }
                });
            }
            return self
                .enqueue_and_await(&generation, &upstream, &upstream_name, request)
                .await;
        }

        let credential = generation
            .credential_manager
            .get_available_key(&upstream_name, true)?;
        self.process_with_credential(&generation, &upstream, &upstream_name, credential, request)
            .await
    }

    async fn enqueue_and_await(
        &self,
        generation: &Generation,
        upstream: &UpstreamConfig,
        upstream_name: &str,
        request: InboundRequest,
    ) -> Result<HttpResponse, GatewayError> {
        let endpoint_reset = generation
            .credential_manager
            .get_api_rate_limit_reset(upstream_name, generation.settings.queue.expiry_seconds);
        let key_reset = generation.credential_manager.get_key_rate_limit_reset(upstream_name);
        let wait = endpoint_reset.max(key_reset).max(1);

        let receiver = self.queue.enqueue(upstream_name, request, wait)?;
        let total_timeout = Duration::from_secs(wait) + Duration::from_secs(upstream.timeout_seconds);

        match tokio::time::timeout(total_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::Cancelled),
            Err(_) => Err(GatewayError::RequestExpired {
                upstream: upstream_name.to_string(),
                waited_seconds: wait,
            }),
        }
    }

    /// Spec steps 5-8: header substitution through finalization. Shared by
    /// the direct path and the dequeued path, which only differ in how the
    /// credential was obtained.
    async fn process_with_credential(
        &self,
        generation: &Generation,
        upstream: &UpstreamConfig,
        upstream_name: &str,
        credential: String,
        request: InboundRequest,
    ) -> Result<HttpResponse, GatewayError> {
        let mut variables = HashMap::new();
        for name in header_substituter::referenced_variables(&upstream.headers) {
            if name == upstream.key_variable {
                continue;
            }
            match generation.credential_manager.draw_variable(upstream_name, &name) {
                Ok(value) => {
                    variables.insert(name, value);
                }
                Err(error) => warn!("orchestrator: could not draw variable '{}': {}", name, error),
            }
        }
        variables.insert(upstream.key_variable.clone(), credential.clone());

        let rewritten = upstream.rewrite_path(request.residual_path.as_deref().unwrap_or("/"));
        let url = format!("{}{}", upstream.endpoint.trim_end_matches('/'), rewritten);

        let execution_request = ExecutionRequest {
            method: request.method.clone(),
            url,
            original_headers: request.headers.clone(),
            templates: upstream.headers.clone(),
            variables,
            body: request.body.clone(),
        };

        let response = self
            .executor
            .execute(upstream, execution_request, &upstream.key_variable, credential)
            .await?;
        Ok(finalizer::finalize(response, &request.original_host).await)
    }
}

impl DequeueHandler for Orchestrator {
    fn process_dequeued<'a>(
        &'a self,
        upstream: &'a str,
        credential: String,
        request: InboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, GatewayError>> + Send + 'a>> {
        Box::pin(async move {
            let generation = self.generation();
            let upstream_cfg = generation
                .settings
                .upstreams
                .iter()
                .find(|u| u.name == upstream)
                .cloned()
                .ok_or_else(|| GatewayError::ConfigError {
                    message: format!("upstream '{}' vanished between enqueue and dequeue", upstream),
                })?;
            self.process_with_credential(&generation, &upstream_cfg, upstream, credential, request)
                .await
        })
    }
}
