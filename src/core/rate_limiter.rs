//! Sliding-window admission, one instance per credential and one per
//! upstream endpoint.
//!
//! Grounded in the teacher's `middleware/rate_limit.rs` sliding-window style
//! (a timestamp deque pruned on every check), generalized here into a
//! freestanding type the credential manager owns rather than an actix
//! middleware tied to a single route.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::upstream::RateLimitSpec;

struct State {
    timestamps: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

/// A single sliding-window limiter. `spec.is_unlimited()` short-circuits
/// every operation to "always admits, never blocked".
pub struct RateLimiter {
    spec: RateLimitSpec,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(spec: RateLimitSpec) -> Self {
        RateLimiter {
            spec,
            state: Mutex::new(State {
                timestamps: VecDeque::new(),
                blocked_until: None,
            }),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.spec.window_seconds)
    }

    /// Evicts timestamps outside the window. Caller holds the lock.
    fn evict(state: &mut State, now: Instant, window: Duration) {
        while let Some(&front) = state.timestamps.front() {
            if now.saturating_duration_since(front) >= window {
                state.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Attempts to admit a request now. Evicts stale timestamps first.
    pub fn allow(&self) -> bool {
        if self.spec.is_unlimited() {
            return true;
        }
        let now = Instant::now();
        let window = self.window();
        let mut state = self.state.lock().unwrap();

        if let Some(until) = state.blocked_until {
            if now < until {
                return false;
            }
            state.blocked_until = None;
        }

        Self::evict(&mut state, now, window);
        if (state.timestamps.len() as u32) < self.spec.capacity {
            state.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// `allow`'s predicate without admitting.
    pub fn is_rate_limited(&self) -> bool {
        if self.spec.is_unlimited() {
            return false;
        }
        let now = Instant::now();
        let window = self.window();
        let mut state = self.state.lock().unwrap();

        if let Some(until) = state.blocked_until {
            if now < until {
                return true;
            }
            state.blocked_until = None;
        }

        Self::evict(&mut state, now, window);
        state.timestamps.len() as u32 >= self.spec.capacity
    }

    /// Remaining admission slots in the current window.
    pub fn remaining(&self) -> i64 {
        if self.spec.is_unlimited() {
            return i64::MAX;
        }
        let now = Instant::now();
        let window = self.window();
        let mut state = self.state.lock().unwrap();
        Self::evict(&mut state, now, window);
        self.spec.capacity as i64 - state.timestamps.len() as i64
    }

    /// Seconds until the window frees capacity, or until `blocked_until`
    /// passes, whichever is later. `0` if already admitting.
    pub fn reset_time(&self) -> u64 {
        let now = Instant::now();
        let window = self.window();
        let mut state = self.state.lock().unwrap();
        Self::evict(&mut state, now, window);

        let window_reset = if !self.spec.is_unlimited() && state.timestamps.len() as u32 >= self.spec.capacity
        {
            let oldest = *state.timestamps.front().unwrap();
            window
                .checked_sub(now.saturating_duration_since(oldest))
                .map(|d| d.as_secs().max(1))
                .unwrap_or(0)
        } else {
            0
        };

        let block_reset = state
            .blocked_until
            .map(|until| until.saturating_duration_since(now).as_secs())
            .unwrap_or(0);

        window_reset.max(block_reset)
    }

    /// Forces `reset_time() >= seconds` without admitting a request.
    pub fn mark_rate_limited(&self, seconds: f64) {
        let seconds = seconds.max(0.0);
        let until = Instant::now() + Duration::from_secs_f64(seconds);
        let mut state = self.state.lock().unwrap();
        state.blocked_until = match state.blocked_until {
            Some(existing) if existing > until => Some(existing),
            _ => Some(until),
        };
    }

    /// Clears all admission history and any `blocked_until` sentinel.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.timestamps.clear();
        state.blocked_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_always_admits() {
        let limiter = RateLimiter::new(RateLimitSpec::UNLIMITED);
        for _ in 0..1000 {
            assert!(limiter.allow());
        }
        assert_eq!(limiter.reset_time(), 0);
    }

    #[test]
    fn capacity_is_enforced() {
        let limiter = RateLimiter::new(RateLimitSpec {
            capacity: 2,
            window_seconds: 60,
        });
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
        assert!(limiter.is_rate_limited());
    }

    #[test]
    fn mark_rate_limited_forces_a_minimum_reset() {
        let limiter = RateLimiter::new(RateLimitSpec {
            capacity: 5,
            window_seconds: 60,
        });
        limiter.mark_rate_limited(30.0);
        assert!(limiter.reset_time() >= 30);
        assert!(!limiter.allow());
    }

    #[test]
    fn reset_clears_history() {
        let limiter = RateLimiter::new(RateLimitSpec {
            capacity: 1,
            window_seconds: 60,
        });
        assert!(limiter.allow());
        assert!(!limiter.allow());
        limiter.reset();
        assert!(limiter.allow());
    }
}
