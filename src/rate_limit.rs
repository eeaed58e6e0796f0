use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::config;

/// Sliding-window attempt counter keyed by an arbitrary string.
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
    limit: usize,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            config::LOGIN_ATTEMPT_LIMIT,
            Duration::from_secs(config::LOGIN_ATTEMPT_WINDOW_SECS),
        )
    }
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Records an attempt at `now` and returns whether it is within the limit.
    /// Rejected attempts are not recorded.
    pub fn check(&self, key: &str, now: Instant) -> bool {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);

        // Prune every key so idle entries do not accumulate.
        let window = self.window;
        attempts.retain(|_, times| {
            while let Some(&oldest) = times.front() {
                if now.saturating_duration_since(oldest) >= window {
                    times.pop_front();
                } else {
                    break;
                }
            }
            !times.is_empty()
        });

        let times = attempts.entry(key.to_string()).or_default();
        if times.len() >= self.limit {
            return false;
        }
        times.push_back(now);
        true
    }

    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
