//! Credential/value selection strategies.
//!
//! Grounded in the teacher's `services/load_balancer.rs` trait-object
//! pattern (`Arc<dyn LoadBalancer>` picked once per upstream at config load),
//! but the strategy set and draw semantics here are the ones this system
//! needs: round_robin, random, least_requests, fastest_response and weighted
//! over an arbitrary value list, not just backend URLs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::Rng;

use crate::models::error::GatewayError;
use crate::models::upstream::LoadBalancingStrategy;

/// Bound on the fastest-response FIFO per value (spec default K).
const RESPONSE_SAMPLE_CAP: usize = 200;

/// One selector instance per upstream per variable (the key variable's
/// selector draws credentials; other variables get their own parallel
/// selector over their own value list). Selects by index into the caller's
/// value vector, never holding the values itself.
pub struct Selector {
    strategy: LoadBalancingStrategy,
    len: usize,
    rr_index: AtomicUsize,
    active: Vec<AtomicI64>,
    response_times: Vec<Mutex<VecDeque<f64>>>,
    weights: Mutex<Vec<u32>>,
}

impl Selector {
    pub fn new(
        strategy: LoadBalancingStrategy,
        len: usize,
        weights: Vec<u32>,
    ) -> Result<Self, GatewayError> {
        let len = len.max(1);
        if !weights.is_empty() && weights.len() != len {
            return Err(GatewayError::ConfigError {
                message: format!(
                    "weight vector length ({}) must match value count ({})",
                    weights.len(),
                    len
                ),
            });
        }
        Ok(Selector {
            strategy,
            len,
            rr_index: AtomicUsize::new(0),
            active: (0..len).map(|_| AtomicI64::new(0)).collect(),
            response_times: (0..len).map(|_| Mutex::new(VecDeque::new())).collect(),
            weights: Mutex::new(weights),
        })
    }

    pub fn set_weights(&self, weights: Vec<u32>) -> Result<(), GatewayError> {
        if !weights.is_empty() && weights.len() != self.len {
            return Err(GatewayError::ConfigError {
                message: format!(
                    "weight vector length ({}) must match value count ({})",
                    weights.len(),
                    self.len
                ),
            });
        }
        *self.weights.lock().unwrap() = weights;
        Ok(())
    }

    /// Draws the next index per the configured strategy.
    pub fn next(&self) -> usize {
        match self.strategy {
            LoadBalancingStrategy::RoundRobin => self.round_robin(),
            LoadBalancingStrategy::Random => self.random(),
            LoadBalancingStrategy::LeastRequests => self.least_requests(),
            LoadBalancingStrategy::FastestResponse => self.fastest_response(),
            LoadBalancingStrategy::Weighted => self.weighted(),
        }
    }

    fn round_robin(&self) -> usize {
        self.rr_index.fetch_add(1, Ordering::Relaxed) % self.len
    }

    fn random(&self) -> usize {
        rand::thread_rng().gen_range(0..self.len)
    }

    fn least_requests(&self) -> usize {
        let counts: Vec<i64> = self.active.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        let min = *counts.iter().min().unwrap();
        let minima: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == min)
            .map(|(i, _)| i)
            .collect();
        minima[rand::thread_rng().gen_range(0..minima.len())]
    }

    fn fastest_response(&self) -> usize {
        let means: Vec<Option<f64>> = self
            .response_times
            .iter()
            .map(|samples| {
                let samples = samples.lock().unwrap();
                if samples.is_empty() {
                    None
                } else {
                    Some(samples.iter().sum::<f64>() / samples.len() as f64)
                }
            })
            .collect();

        // Zero-sample values bootstrap ahead of any value with samples.
        let unsampled: Vec<usize> = means
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_none())
            .map(|(i, _)| i)
            .collect();
        if !unsampled.is_empty() {
            return unsampled[rand::thread_rng().gen_range(0..unsampled.len())];
        }

        let best = means
            .iter()
            .map(|m| m.unwrap())
            .fold(f64::INFINITY, f64::min);
        let minima: Vec<usize> = means
            .iter()
            .enumerate()
            .filter(|(_, m)| m.unwrap() == best)
            .map(|(i, _)| i)
            .collect();
        minima[rand::thread_rng().gen_range(0..minima.len())]
    }

    fn weighted(&self) -> usize {
        let weights = self.weights.lock().unwrap();
        let total: u64 = weights.iter().map(|&w| w as u64).sum();
        if weights.is_empty() || total == 0 {
            drop(weights);
            return self.random();
        }
        let draw = rand::thread_rng().gen_range(0..total);
        let mut cumulative: u64 = 0;
        for (i, &w) in weights.iter().enumerate() {
            cumulative += w as u64;
            if cumulative > draw {
                return i;
            }
        }
        weights.len() - 1
    }

    pub fn record_started(&self, index: usize) {
        if let Some(counter) = self.active.get(index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_completed(&self, index: usize) {
        if let Some(counter) = self.active.get(index) {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn record_response_time(&self, index: usize, seconds: f64) {
        if let Some(samples) = self.response_times.get(index) {
            let mut samples = samples.lock().unwrap();
            samples.push_back(seconds);
            while samples.len() > RESPONSE_SAMPLE_CAP {
                samples.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_visits_every_value_evenly() {
        let selector = Selector::new(LoadBalancingStrategy::RoundRobin, 3, vec![]).unwrap();
        let mut counts = [0; 3];
        for _ in 0..30 {
            counts[selector.next()] += 1;
        }
        assert_eq!(counts, [10, 10, 10]);
    }

    #[test]
    fn least_requests_prefers_idle_value() {
        let selector = Selector::new(LoadBalancingStrategy::LeastRequests, 2, vec![]).unwrap();
        selector.record_started(0);
        selector.record_started(0);
        assert_eq!(selector.least_requests(), 1);
    }

    #[test]
    fn fastest_response_bootstraps_unsampled_values_first() {
        let selector = Selector::new(LoadBalancingStrategy::FastestResponse, 2, vec![]).unwrap();
        selector.record_response_time(0, 0.05);
        assert_eq!(selector.fastest_response(), 1);
    }

    #[test]
    fn weighted_falls_back_to_random_on_all_zero_weights() {
        let selector = Selector::new(LoadBalancingStrategy::Weighted, 3, vec![0, 0, 0]).unwrap();
        for _ in 0..20 {
            let idx = selector.next();
            assert!(idx < 3);
        }
    }

    #[test]
    fn mismatched_weight_length_is_a_config_error() {
        assert!(Selector::new(LoadBalancingStrategy::Weighted, 3, vec![1, 2]).is_err());
    }
}
