//! Bounded exponential backoff with jitter for transient provider
//! failures.
//!
//! delay = min(base * 2^attempt, cap) + uniform(0, base)
//!
//! Backoff sleeps must honour the caller's cancellation token: a build
//! job blocked in backoff aborts promptly when cancelled.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Retry policy for one purpose lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// The deterministic part of the delay for `attempt` (0-based).
    #[must_use]
    pub fn exponential_part(&self, attempt: u32) -> Duration {
        let shifted = self
            .base
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.cap);
        shifted.min(self.cap)
    }

    /// Full delay including uniform jitter in `[0, base)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = if self.base.is_zero() {
            0
        } else {
            rand::rng().random_range(0..self.base.as_millis() as u64)
        };
        self.exponential_part(attempt) + Duration::from_millis(jitter_ms)
    }
}

/// Sleep for `delay` unless the token fires first. Returns `false` when
/// the sleep was interrupted by cancellation.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.exponential_part(0), Duration::from_secs(1));
        assert_eq!(policy.exponential_part(1), Duration::from_secs(2));
        assert_eq!(policy.exponential_part(4), Duration::from_secs(16));
        assert_eq!(policy.exponential_part(5), Duration::from_secs(30));
        assert_eq!(policy.exponential_part(20), Duration::from_secs(30));
    }

    #[test]
    fn delays_are_bounded_by_cap_plus_base() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= policy.exponential_part(attempt));
            assert!(delay < policy.exponential_part(attempt) + policy.base);
        }
    }

    #[test]
    fn delays_increase_until_cap() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            assert!(policy.exponential_part(attempt) < policy.exponential_part(attempt + 1));
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let start = std::time::Instant::now();
        let slept = sleep_cancellable(Duration::from_secs(30), &cancel).await;
        assert!(!slept);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
