//! Process-wide metrics sink.
//!
//! Grounded in the teacher's `routes/metrics.rs` `MetricsCollector` (a flat
//! struct of `Arc<AtomicU64>` counters updated lock-free from every request
//! path), generalized from route-keyed counters to upstream/credential-keyed
//! ones and extended with the bounded response-time ring the spec's deferred
//! queue and executor both feed.
//!
//! This is an injected collaborator, not a singleton: `Metrics::default()`
//! is constructed once at startup and handed to every component that needs
//! it, so tests can substitute a capturing sink if they care to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const RESPONSE_SAMPLE_CAP: usize = 500;

#[derive(Default)]
struct CredentialCounters {
    requests: u64,
    errors: u64,
}

#[derive(Default)]
struct UpstreamCounters {
    requests: AtomicU64,
    errors: AtomicU64,
    queue_hits: AtomicU64,
    rate_limit_hits: AtomicU64,
    response_times: Mutex<Vec<f64>>,
    by_credential: Mutex<HashMap<String, CredentialCounters>>,
}

/// Global + per-upstream counters. All totals are monotonically increasing;
/// there is no reset operation, matching the teacher's metrics collector.
#[derive(Default)]
pub struct Metrics {
    total_enqueued: AtomicU64,
    total_processed: AtomicU64,
    total_expired: AtomicU64,
    total_failed: AtomicU64,
    per_upstream: Mutex<HashMap<String, UpstreamCounters>>,
}

impl Metrics {
    fn upstream_counters<'a>(
        per_upstream: &'a mut HashMap<String, UpstreamCounters>,
        upstream: &str,
    ) -> &'a UpstreamCounters {
        per_upstream.entry(upstream.to_string()).or_default()
    }

    pub fn record_request(&self, upstream: &str, credential: &str) {
        let _ = credential;
        let mut per_upstream = self.per_upstream.lock().unwrap();
        Self::upstream_counters(&mut per_upstream, upstream)
            .requests
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(
        &self,
        upstream: &str,
        credential: &str,
        status: u16,
        elapsed_seconds: f64,
    ) {
        let _ = credential;
        self.total_processed.fetch_add(1, Ordering::Relaxed);
        let mut per_upstream = self.per_upstream.lock().unwrap();
        let counters = Self::upstream_counters(&mut per_upstream, upstream);
        if status >= 400 {
            counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut samples = counters.response_times.lock().unwrap();
        samples.push(elapsed_seconds);
        if samples.len() > RESPONSE_SAMPLE_CAP {
            let excess = samples.len() - RESPONSE_SAMPLE_CAP;
            samples.drain(0..excess);
        }
    }

    pub fn record_rate_limit_hit(&self, upstream: &str) {
        let mut per_upstream = self.per_upstream.lock().unwrap();
        Self::upstream_counters(&mut per_upstream, upstream)
            .rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_hit(&self, upstream: &str) {
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        let mut per_upstream = self.per_upstream.lock().unwrap();
        Self::upstream_counters(&mut per_upstream, upstream)
            .queue_hits
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Per-credential request/error counts, called once per attempt from
    /// the executor alongside `record_response`. This is the breakdown the
    /// admin metrics route reads to spot one credential erroring out while
    /// its siblings stay healthy.
    pub fn record_key_usage(&self, upstream: &str, credential_id: &str, status: u16) {
        let mut per_upstream = self.per_upstream.lock().unwrap();
        let counters = Self::upstream_counters(&mut per_upstream, upstream);
        let mut by_credential = counters.by_credential.lock().unwrap();
        let entry = by_credential.entry(credential_id.to_string()).or_default();
        entry.requests += 1;
        if status >= 400 {
            entry.errors += 1;
        }
    }

    pub fn record_expired(&self, upstream: &str) {
        self.total_expired.fetch_add(1, Ordering::Relaxed);
        let _ = upstream;
    }

    pub fn record_failed(&self, upstream: &str) {
        self.total_failed.fetch_add(1, Ordering::Relaxed);
        let _ = upstream;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let per_upstream = self.per_upstream.lock().unwrap();
        let upstreams = per_upstream
            .iter()
            .map(|(name, counters)| {
                let samples = counters.response_times.lock().unwrap();
                let mean = if samples.is_empty() {
                    0.0
                } else {
                    samples.iter().sum::<f64>() / samples.len() as f64
                };
                let by_credential = counters
                    .by_credential
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(credential_id, usage)| {
                        (
                            credential_id.clone(),
                            CredentialSnapshot {
                                requests: usage.requests,
                                errors: usage.errors,
                            },
                        )
                    })
                    .collect();
                (
                    name.clone(),
                    UpstreamSnapshot {
                        requests: counters.requests.load(Ordering::Relaxed),
                        errors: counters.errors.load(Ordering::Relaxed),
                        queue_hits: counters.queue_hits.load(Ordering::Relaxed),
                        rate_limit_hits: counters.rate_limit_hits.load(Ordering::Relaxed),
                        mean_response_seconds: mean,
                        by_credential,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            upstreams,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CredentialSnapshot {
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UpstreamSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub queue_hits: u64,
    pub rate_limit_hits: u64,
    pub mean_response_seconds: f64,
    pub by_credential: HashMap<String, CredentialSnapshot>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_expired: u64,
    pub total_failed: u64,
    pub upstreams: HashMap<String, UpstreamSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_requests_and_errors_per_upstream() {
        let metrics = Metrics::default();
        metrics.record_request("oai", "k1");
        metrics.record_response("oai", "k1", 200, 0.1);
        metrics.record_response("oai", "k1", 500, 0.2);

        let snapshot = metrics.snapshot();
        let upstream = &snapshot.upstreams["oai"];
        assert_eq!(upstream.requests, 1);
        assert_eq!(upstream.errors, 1);
        assert_eq!(snapshot.total_processed, 2);
    }

    #[test]
    fn queue_hit_increments_global_and_per_upstream() {
        let metrics = Metrics::default();
        metrics.record_queue_hit("oai");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_enqueued, 1);
        assert_eq!(snapshot.upstreams["oai"].queue_hits, 1);
    }

    #[test]
    fn tracks_usage_and_errors_per_credential() {
        let metrics = Metrics::default();
        metrics.record_key_usage("oai", "k1", 200);
        metrics.record_key_usage("oai", "k1", 429);
        metrics.record_key_usage("oai", "k2", 200);

        let snapshot = metrics.snapshot();
        let upstream = &snapshot.upstreams["oai"];
        assert_eq!(upstream.by_credential["k1"].requests, 2);
        assert_eq!(upstream.by_credential["k1"].errors, 1);
        assert_eq!(upstream.by_credential["k2"].requests, 1);
        assert_eq!(upstream.by_credential["k2"].errors, 0);
    }
}
