//! Per-backend pacing state.

use std::time::Duration;

use tokio::time::Instant;

/// Budget state for a single backend.
#[derive(Debug, Clone)]
pub struct BackendState {
    pub current_delay: Duration,
    /// Earliest instant the next request may start.
    pub next_slot: Option<Instant>,
    pub consecutive_successes: u32,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

impl BackendState {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            next_slot: None,
            consecutive_successes: 0,
            in_backoff: false,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    /// Claim the next request slot and return when it starts.
    ///
    /// Claiming under the caller's write lock keeps concurrent sessions from
    /// picking the same slot.
    pub fn reserve(&mut self, now: Instant) -> Instant {
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + self.current_delay);
        self.total_requests += 1;
        slot
    }

    /// Hold every request back until at least `until`.
    pub fn defer_until(&mut self, until: Instant) {
        if self.next_slot.map_or(true, |next| next < until) {
            self.next_slot = Some(until);
        }
    }

    /// Give back `slot` if the budget still ends at `claimed_until`, i.e.
    /// nobody was spaced after it. Returns whether it was released.
    pub fn release(&mut self, slot: Instant, claimed_until: Option<Instant>) -> bool {
        if self.next_slot != claimed_until {
            return false;
        }
        self.next_slot = Some(slot);
        self.total_requests = self.total_requests.saturating_sub(1);
        true
    }

    #[cfg(test)]
    pub fn time_until_ready(&self, now: Instant) -> Duration {
        self.next_slot
            .map(|next| next.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_spaces_consecutive_slots() {
        let now = Instant::now();
        let mut state = BackendState::new(Duration::from_secs(2));

        let first = state.reserve(now);
        let second = state.reserve(now);
        let third = state.reserve(now);

        assert_eq!(first, now);
        assert_eq!(second - first, Duration::from_secs(2));
        assert_eq!(third - second, Duration::from_secs(2));
        assert_eq!(state.total_requests, 3);
    }

    #[test]
    fn test_release_only_last_reservation() {
        let now = Instant::now();
        let mut state = BackendState::new(Duration::from_secs(2));
        state.reserve(now);
        let first = state.reserve(now);
        let first_until = state.next_slot;
        state.reserve(now);

        assert!(!state.release(first, first_until));
        assert_eq!(state.total_requests, 3);

        let last_until = state.next_slot;
        let last = last_until.unwrap() - Duration::from_secs(2);
        assert!(state.release(last, last_until));
        assert_eq!(state.next_slot, Some(now + Duration::from_secs(4)));
        assert_eq!(state.total_requests, 2);
    }

    #[test]
    fn test_defer_only_moves_forward() {
        let now = Instant::now();
        let mut state = BackendState::new(Duration::from_secs(1));
        state.defer_until(now + Duration::from_secs(30));
        state.defer_until(now + Duration::from_secs(5));
        assert_eq!(state.time_until_ready(now), Duration::from_secs(30));
    }
}
