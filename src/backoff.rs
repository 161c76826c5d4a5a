//! Reconnect scheduling policy.
//!
//! Pure delay computation, no side effects: the session owns the attempt
//! counter and the timer, and consults the policy for whether and when the
//! next backend connection attempt should happen.

use std::time::{Duration, Instant};

/// Capped exponential backoff with a maximum-attempt ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Attempts past this number are not retried.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Computes the delay before the given attempt (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Whether the given attempt (1-based) is within the ceiling.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

/// Per-session reconnect bookkeeping.
///
/// The attempt counter is monotonically non-decreasing within a session and
/// resets only on a successful backend connect.
#[derive(Debug, Default)]
pub struct ReconnectState {
    attempts: u32,
    last_attempt: Option<Instant>,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new attempt and returns its 1-based number.
    pub fn record(&mut self) -> u32 {
        self.attempts += 1;
        self.last_attempt = Some(Instant::now());
        self.attempts
    }

    /// Resets the counter after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(16000),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_delay_sequence_doubles_then_caps() {
        let p = policy();
        let delays: Vec<u64> = (1..=8).map(|a| p.next_delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 16000, 16000, 16000]);
    }

    #[test]
    fn test_delay_never_decreases() {
        let p = policy();
        let mut prev = Duration::ZERO;
        for attempt in 1..=64 {
            let d = p.next_delay(attempt);
            assert!(d >= prev);
            assert!(d <= p.max_delay);
            prev = d;
        }
    }

    #[test]
    fn test_huge_attempt_number_saturates_at_cap() {
        let p = policy();
        assert_eq!(p.next_delay(u32::MAX), p.max_delay);
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        // Attempt numbers are 1-based; 0 is tolerated as the base delay.
        let p = policy();
        assert_eq!(p.next_delay(0), p.base_delay);
    }

    #[test]
    fn test_should_retry_ceiling() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(5));
        assert!(!p.should_retry(6));
    }

    #[test]
    fn test_state_record_and_reset() {
        let mut state = ReconnectState::new();
        assert_eq!(state.attempts(), 0);
        assert!(state.last_attempt().is_none());

        assert_eq!(state.record(), 1);
        assert_eq!(state.record(), 2);
        assert_eq!(state.attempts(), 2);
        assert!(state.last_attempt().is_some());

        state.reset();
        assert_eq!(state.attempts(), 0);
        assert!(state.last_attempt().is_none());
    }

    #[test]
    fn test_state_monotone_within_session() {
        let mut state = ReconnectState::new();
        let mut prev = 0;
        for _ in 0..10 {
            let n = state.record();
            assert!(n > prev);
            prev = n;
        }
    }
}
