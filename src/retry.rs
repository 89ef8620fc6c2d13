//! Reconnect backoff for stream consumers.
//!
//! `StreamClient` never retries on its own. Consumers that want to keep a feed
//! alive call `next_delay` after each failed or ended session and `reset` once a
//! session has delivered frames again.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the attempt limit is spent.
    ///
    /// Doubles from `initial` and is capped at `max`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.max_attempts {
            if self.attempts >= limit {
                return None;
            }
        }
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(10), None);
        let delays: Vec<u64> = (0..5)
            .filter_map(|_| backoff.next_delay())
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn stops_after_attempt_limit_until_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), Some(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn many_attempts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), None);
        for _ in 0..100 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_secs(30));
        }
    }
}
