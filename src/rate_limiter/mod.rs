//! Adaptive per-backend request budget.
//!
//! Spaces requests to each backend, backs off on rate limit responses and
//! gradually recovers on success. Clones share state, so every session in a
//! process draws from the same budget.

mod backend_state;
mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use backend_state::BackendState;
pub use config::{BackendStats, RateLimitConfig};

/// Request budget keyed by backend name.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    backends: Arc<RwLock<HashMap<String, BackendState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            backends: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Wait for the backend's next request slot. Returns how long we waited.
    ///
    /// The slot is claimed under the lock; the wait happens after releasing
    /// it. Dropping the returned future abandons the wait and hands the slot
    /// back, unless a later request has already been spaced after it.
    pub async fn acquire(&self, backend: &str) -> Duration {
        let (slot, claimed_until) = {
            let mut backends = self.backends.write().await;
            let state = backends
                .entry(backend.to_string())
                .or_insert_with(|| BackendState::new(self.config.base_delay));
            let slot = state.reserve(Instant::now());
            (slot, state.next_slot)
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if wait > Duration::ZERO {
            debug!("Request budget for {}: waiting {:?}", backend, wait);
            let mut pending = PendingSlot {
                limiter: self,
                backend,
                slot,
                claimed_until,
                done: false,
            };
            tokio::time::sleep(wait).await;
            pending.done = true;
        }
        wait
    }

    /// Report a successful request - may decrease delay.
    pub async fn report_success(&self, backend: &str) {
        let mut backends = self.backends.write().await;
        if let Some(state) = backends.get_mut(backend) {
            state.consecutive_successes += 1;

            if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
                let reduced = Duration::from_secs_f64(
                    state.current_delay.as_secs_f64() * self.config.recovery_multiplier,
                );
                state.current_delay = reduced.max(self.config.min_delay);

                if state.current_delay <= self.config.base_delay {
                    state.in_backoff = false;
                    state.current_delay = self.config.base_delay;
                    info!("Backend {} recovered from rate limit backoff", backend);
                } else {
                    debug!("Backend {} delay reduced to {:?}", backend, state.current_delay);
                }

                state.consecutive_successes = 0;
            }
        }
    }

    /// Report a rate limit response - increases delay.
    ///
    /// A backend-supplied `retry_after` also holds back every session sharing
    /// this budget until it has elapsed.
    pub async fn report_rate_limit(&self, backend: &str, retry_after: Option<Duration>) {
        let mut backends = self.backends.write().await;
        let state = backends
            .entry(backend.to_string())
            .or_insert_with(|| BackendState::new(self.config.base_delay));

        state.rate_limit_hits += 1;
        state.consecutive_successes = 0;
        state.in_backoff = true;

        let increased = Duration::from_secs_f64(
            state.current_delay.as_secs_f64() * self.config.backoff_multiplier,
        );
        state.current_delay = increased.min(self.config.max_delay);

        if let Some(wait) = retry_after {
            state.defer_until(Instant::now() + wait);
        }

        warn!(
            "Rate limited by {}, backing off to {:?}",
            backend, state.current_delay
        );
    }

    /// Report a server error - mild backoff.
    pub async fn report_server_error(&self, backend: &str) {
        let mut backends = self.backends.write().await;
        if let Some(state) = backends.get_mut(backend) {
            state.consecutive_successes = 0;
            let increased = Duration::from_secs_f64(state.current_delay.as_secs_f64() * 1.5);
            state.current_delay = increased.min(self.config.max_delay);
            debug!(
                "Server error from {}, delay increased to {:?}",
                backend, state.current_delay
            );
        }
    }

    /// Time until the backend accepts another request.
    #[cfg(test)]
    pub async fn time_until_ready(&self, backend: &str) -> Duration {
        let backends = self.backends.read().await;
        backends
            .get(backend)
            .map(|s| s.time_until_ready(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub async fn stats(&self) -> HashMap<String, BackendStats> {
        let backends = self.backends.read().await;
        backends
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    BackendStats {
                        current_delay: v.current_delay,
                        in_backoff: v.in_backoff,
                        total_requests: v.total_requests,
                        rate_limit_hits: v.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}

/// A reserved slot whose wait has not finished yet.
struct PendingSlot<'a> {
    limiter: &'a RateLimiter,
    backend: &'a str,
    slot: Instant,
    claimed_until: Option<Instant>,
    done: bool,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        // Drop cannot await; a contended lock just keeps the reservation.
        if let Ok(mut backends) = self.limiter.backends.try_write() {
            if let Some(state) = backends.get_mut(self.backend) {
                if state.release(self.slot, self.claimed_until) {
                    debug!("Request budget for {}: released abandoned slot", self.backend);
                }
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backoff_on_rate_limit() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            ..Default::default()
        });

        limiter.acquire("api").await;
        limiter.report_rate_limit("api", None).await;

        let stats = limiter.stats().await;
        let api = stats.get("api").unwrap();
        assert_eq!(api.current_delay, Duration::from_millis(200));
        assert!(api.in_backoff);
        assert_eq!(api.rate_limit_hits, 1);
    }

    #[tokio::test]
    async fn test_backoff_is_capped() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_secs(600),
            max_delay: Duration::from_secs(900),
            ..Default::default()
        });
        limiter.report_rate_limit("web", None).await;
        limiter.report_rate_limit("web", None).await;

        let stats = limiter.stats().await;
        assert_eq!(stats["web"].current_delay, Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_recovery_after_threshold_successes() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(100),
            min_delay: Duration::from_millis(50),
            recovery_threshold: 2,
            ..Default::default()
        });
        limiter.report_rate_limit("api", None).await;

        limiter.report_success("api").await;
        assert!(limiter.stats().await["api"].in_backoff);

        limiter.report_success("api").await;
        let stats = limiter.stats().await;
        assert!(!stats["api"].in_backoff);
        assert_eq!(stats["api"].current_delay, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_spacing() {
        let limiter = RateLimiter::with_config(RateLimitConfig::with_base_delay(
            Duration::from_secs(2),
        ));
        let other = limiter.clone();

        assert_eq!(limiter.acquire("api").await, Duration::ZERO);
        assert_eq!(other.acquire("api").await, Duration::from_secs(2));
        // A different backend has its own budget.
        assert_eq!(other.acquire("web").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_hands_slot_back() {
        let limiter = RateLimiter::with_config(RateLimitConfig::with_base_delay(
            Duration::from_secs(10),
        ));
        assert_eq!(limiter.acquire("api").await, Duration::ZERO);

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), limiter.acquire("api")).await;
        assert!(abandoned.is_err());

        // The abandoned slot at +10s is free again, so the next request
        // waits for it rather than for the one after.
        assert_eq!(limiter.acquire("api").await, Duration::from_secs(9));
        assert_eq!(limiter.stats().await["api"].total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_keeps_later_reservations() {
        let limiter = RateLimiter::with_config(RateLimitConfig::with_base_delay(
            Duration::from_secs(10),
        ));
        limiter.acquire("api").await;

        let waiting = limiter.clone();
        let first = tokio::spawn(async move { waiting.acquire("api").await });
        tokio::task::yield_now().await;
        let queued = limiter.clone();
        let second = tokio::spawn(async move { queued.acquire("api").await });
        tokio::task::yield_now().await;

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(second.await.unwrap(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_holds_back_shared_budget() {
        let limiter = RateLimiter::with_config(RateLimitConfig::with_base_delay(Duration::ZERO));
        limiter.acquire("api").await;
        limiter
            .report_rate_limit("api", Some(Duration::from_secs(30)))
            .await;

        assert_eq!(limiter.time_until_ready("api").await, Duration::from_secs(30));
        assert_eq!(limiter.clone().acquire("api").await, Duration::from_secs(30));
    }
}
