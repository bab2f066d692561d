//! Per-upstream deferred-request queue and its single reaper task.
//!
//! A request that cannot be served immediately (credential exhaustion or an
//! endpoint rate limit) is parked here with an estimated wake time instead
//! of failing outright. One background task drains every upstream's heap
//! once a tick, which — per the design notes this system is built from —
//! is deliberate: a single reaper serializes draining decisions and avoids
//! a thundering herd on credential reacquisition.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::credential_manager::CredentialManager;
use crate::core::metrics::Metrics;
use crate::models::error::GatewayError;
use crate::models::request::InboundRequest;

const REAPER_TICK: Duration = Duration::from_secs(1);

/// Implemented by the orchestrator: resumes a dequeued request from header
/// substitution onward (spec steps 5-8), now that a credential has been
/// assigned to it.
pub trait DequeueHandler: Send + Sync {
    fn process_dequeued<'a>(
        &'a self,
        upstream: &'a str,
        credential: String,
        request: InboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<actix_web::HttpResponse, GatewayError>> + Send + 'a>>;
}

struct HeapEntry {
    scheduled_time: Instant,
    seq: u64,
    arrival: Instant,
    request: InboundRequest,
    sender: oneshot::Sender<Result<actix_web::HttpResponse, GatewayError>>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_time == other.scheduled_time && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest
        // (scheduled_time, seq) to pop first.
        other
            .scheduled_time
            .cmp(&self.scheduled_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct UpstreamQueue {
    heap: BinaryHeap<HeapEntry>,
}

pub struct DeferredQueue {
    upstreams: Mutex<HashMap<String, UpstreamQueue>>,
    seq: AtomicU64,
    max_size_per_upstream: usize,
    default_expiry: Duration,
    metrics: Arc<Metrics>,
}

impl DeferredQueue {
    pub fn new(max_size_per_upstream: usize, default_expiry: Duration, metrics: Arc<Metrics>) -> Self {
        DeferredQueue {
            upstreams: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            max_size_per_upstream,
            default_expiry,
            metrics,
        }
    }

    /// Parks `request`, to be woken roughly `reset_in_seconds` from now.
    /// Returns the receive side of its completion channel.
    pub fn enqueue(
        &self,
        upstream: &str,
        request: InboundRequest,
        reset_in_seconds: u64,
    ) -> Result<oneshot::Receiver<Result<actix_web::HttpResponse, GatewayError>>, GatewayError> {
        let mut upstreams = self.upstreams.lock().unwrap();
        let queue = upstreams.entry(upstream.to_string()).or_default();

        if queue.heap.len() >= self.max_size_per_upstream {
            return Err(GatewayError::QueueFull {
                upstream: upstream.to_string(),
            });
        }

        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let scheduled_time = Instant::now() + Duration::from_secs(reset_in_seconds);
        let (tx, rx) = oneshot::channel();
        let arrival = request.arrival;
        queue.heap.push(HeapEntry {
            scheduled_time,
            seq,
            arrival,
            request,
            sender: tx,
        });

        self.metrics.record_queue_hit(upstream);
        Ok(rx)
    }

    pub fn queue_size(&self, upstream: &str) -> usize {
        self.upstreams
            .lock()
            .unwrap()
            .get(upstream)
            .map(|q| q.heap.len())
            .unwrap_or(0)
    }

    pub fn all_queue_sizes(&self) -> HashMap<String, usize> {
        self.upstreams
            .lock()
            .unwrap()
            .iter()
            .map(|(name, q)| (name.clone(), q.heap.len()))
            .collect()
    }

    /// Resolves every pending entry for `upstream` with a cleared error.
    pub fn clear(&self, upstream: &str) {
        let mut upstreams = self.upstreams.lock().unwrap();
        if let Some(queue) = upstreams.get_mut(upstream) {
            while let Some(entry) = queue.heap.pop() {
                let _ = entry.sender.send(Err(GatewayError::Cancelled));
                self.metrics.record_failed(upstream);
            }
        }
    }

    pub fn clear_all(&self) {
        let names: Vec<String> = self.upstreams.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.clear(&name);
        }
    }

    fn readiness(&self, credential_manager: &CredentialManager, upstream: &str) -> bool {
        credential_manager.is_api_available(upstream).unwrap_or(false)
            && credential_manager.has_available_keys(upstream).unwrap_or(false)
    }

    /// Drains every upstream's heap once: pops ready, not-yet-expired
    /// entries and hands each to `handler` on its own task. Stops draining
    /// an upstream for this tick as soon as it is not ready, leaving later
    /// entries parked.
    fn drain_tick(
        self: &Arc<Self>,
        credential_manager: &Arc<CredentialManager>,
        handler: &Arc<dyn DequeueHandler>,
    ) {
        let now = Instant::now();
        let mut upstreams = self.upstreams.lock().unwrap();
        for (name, queue) in upstreams.iter_mut() {
            loop {
                let Some(top) = queue.heap.peek() else { break };
                if top.scheduled_time > now {
                    break;
                }
                if !self.readiness(credential_manager, name) {
                    break;
                }

                let entry = queue.heap.pop().expect("peeked entry must exist");
                if now.saturating_duration_since(entry.arrival) > self.default_expiry * 2 {
                    warn!("queue: entry for '{}' expired while parked", name);
                    self.metrics.record_expired(name);
                    let _ = entry.sender.send(Err(GatewayError::RequestExpired {
                        upstream: name.clone(),
                        waited_seconds: now.saturating_duration_since(entry.arrival).as_secs(),
                    }));
                    continue;
                }

                let credential = match credential_manager.get_available_key(name, true) {
                    Ok(c) => c,
                    Err(_) => {
                        // Lost the race between readiness check and draw;
                        // put it back and try again next tick.
                        queue.heap.push(entry);
                        break;
                    }
                };

                let handler = Arc::clone(handler);
                let upstream_name = name.clone();
                tokio::spawn(async move {
                    let HeapEntry { request, sender, .. } = entry;
                    let result = handler.process_dequeued(&upstream_name, credential, request).await;
                    let _ = sender.send(result);
                });
            }
        }
    }

    /// Spawns the single reaper task. Aborting the returned handle is the
    /// cancellation path used at shutdown.
    pub fn spawn_reaper(
        self: Arc<Self>,
        credential_manager: Arc<CredentialManager>,
        handler: Arc<dyn DequeueHandler>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("deferred queue reaper started");
            let mut interval = tokio::time::interval(REAPER_TICK);
            loop {
                interval.tick().await;
                self.drain_tick(&credential_manager, &handler);
            }
        })
    }
}
