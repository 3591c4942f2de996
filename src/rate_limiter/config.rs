//! Request budget tuning.

use std::time::Duration;

/// Pacing parameters shared by every backend key.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Spacing between requests when not backing off.
    pub base_delay: Duration,
    /// Floor for recovered delays.
    pub min_delay: Duration,
    /// Ceiling for backed-off delays.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub recovery_multiplier: f64,
    /// Consecutive successes needed before the delay shrinks.
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15 * 60),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.5,
            recovery_threshold: 5,
        }
    }
}

impl RateLimitConfig {
    /// Config with a custom base spacing, keeping the other defaults.
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            min_delay: Duration::from_millis(500).min(base_delay),
            ..Default::default()
        }
    }
}

/// Snapshot of one backend's budget.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendStats {
    pub current_delay: Duration,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}
