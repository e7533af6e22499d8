//! `OrchestratorRuntime`: the idempotency map and sliding-window rate
//! limiter as a single value constructed once at process start and passed
//! explicitly, instead of module-level singletons.
//!
//! Grounded on `publish::gitlab`'s `Arc<Semaphore>` concurrency-gating
//! pattern, generalized from a concurrency permit count to a time-windowed
//! request counter.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::comment_manager::IdempotencyMap;

/// Process-wide orchestrator state: idempotency tracking plus the internal
/// sliding-window rate limiter consulted by the dedup engine's whole-PR
/// guard.
pub struct OrchestratorRuntime {
    idempotency: IdempotencyMap,
    request_times: Mutex<VecDeque<Instant>>,
}

impl OrchestratorRuntime {
    pub fn new() -> Self {
        Self {
            idempotency: IdempotencyMap::new(),
            request_times: Mutex::new(VecDeque::new()),
        }
    }

    pub fn idempotency(&self) -> &IdempotencyMap {
        &self.idempotency
    }

    /// Records one platform request against the sliding window.
    pub fn record_request(&self) {
        let mut times = self.request_times.lock().expect("runtime poisoned");
        times.push_back(Instant::now());
    }

    /// Number of requests recorded within `window` of now, evicting stale
    /// entries as a side effect.
    pub fn requests_in_window(&self, window: Duration) -> u32 {
        let mut times = self.request_times.lock().expect("runtime poisoned");
        let cutoff = Instant::now().checked_sub(window).unwrap_or(Instant::now());
        while matches!(times.front(), Some(t) if *t < cutoff) {
            times.pop_front();
        }
        times.len() as u32
    }
}

impl Default for OrchestratorRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests_within_window_and_evicts_stale() {
        let rt = OrchestratorRuntime::new();
        rt.record_request();
        rt.record_request();
        assert_eq!(rt.requests_in_window(Duration::from_secs(3600)), 2);
        // A zero-length window evicts everything already recorded.
        assert_eq!(rt.requests_in_window(Duration::from_secs(0)), 0);
    }
}
