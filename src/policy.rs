//! Retry ladder and scheduled break policy.
//!
//! Everything here is a pure function of its inputs so the controller's
//! recovery behavior can be tested without a clock.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::fetchers::ErrorKind;

/// Automatic retries allowed per failure episode before asking the user.
pub const MAX_AUTOMATIC_ATTEMPTS: u32 = 5;

/// Waits between automatic network retries. The last step repeats.
pub const NETWORK_LADDER: [Duration; 5] = [
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(900),
];

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Sleep, then retry automatically.
    Wait(Duration),
    /// Automatic attempts are used up; ask the user.
    Escalate,
    /// Not retryable without the user.
    Surface,
}

/// Wait before automatic retry number `attempt` (zero-based).
pub fn network_step(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(NETWORK_LADDER.len() - 1);
    NETWORK_LADDER[idx]
}

/// Decide how to recover from a failure of `kind`.
///
/// `attempt` counts automatic retries already made in this episode. A
/// backend-supplied `retry_after` replaces the ladder step for rate limits.
pub fn decide(kind: ErrorKind, attempt: u32, retry_after: Option<Duration>) -> Backoff {
    match kind {
        ErrorKind::CredentialExpired | ErrorKind::Unclassified => Backoff::Surface,
        ErrorKind::Network | ErrorKind::RateLimited => {
            if attempt >= MAX_AUTOMATIC_ATTEMPTS {
                return Backoff::Escalate;
            }
            let wait = match (kind, retry_after) {
                (ErrorKind::RateLimited, Some(wait)) => wait,
                _ => network_step(attempt),
            };
            Backoff::Wait(wait)
        }
    }
}

/// Deliberate cooldown after every `every` collected items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakPolicy {
    pub every: u64,
    pub min: Duration,
    pub max: Duration,
}

impl BreakPolicy {
    pub fn new(every: u64, min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self { every, min, max }
    }

    /// Whether going from `previous_total` to `current_total` crossed a multiple of `every`.
    pub fn crossed(&self, previous_total: u64, current_total: u64) -> bool {
        self.every > 0 && current_total / self.every > previous_total / self.every
    }

    /// Break duration when one is due.
    pub fn pause_due(&self, previous_total: u64, current_total: u64) -> Option<Duration> {
        if !self.crossed(previous_total, current_total) {
            return None;
        }
        Some(self.sample(&mut rand::thread_rng()))
    }

    /// Uniform draw from `[min, max]`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rng.gen_range(min..=max))
    }
}
