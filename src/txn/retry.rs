//! Retry policy for contended transactions.

use rand::Rng;
use std::time::{Duration, Instant};

/// How a contended transaction is retried.
///
/// Only applies when the request asks to retry until resolved. Exhausting
/// the policy ends the transaction with a plain contention failure.
///
/// # Example
/// ```ignore
/// let policy = RetryPolicy::default()
///     .with_max_attempts(10)
///     .with_deadline(Duration::from_millis(500));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (`None` = unbounded).
    pub max_attempts: Option<usize>,
    /// Give up once this much time has passed since the first attempt.
    pub deadline: Option<Duration>,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub base_delay: Duration,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
    /// Pick each delay uniformly from `[0, delay]` instead of sleeping the full delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            deadline: None,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(50),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry immediately with no delay.
    pub fn busy() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub(crate) fn allows_retry(&self, attempts: usize, started: Instant) -> bool {
        if let Some(max) = self.max_attempts {
            if attempts >= max {
                return false;
            }
        }
        if let Some(deadline) = self.deadline {
            if started.elapsed() >= deadline {
                return false;
            }
        }
        true
    }

    /// Capped exponential delay before retry number `attempt` (1-based).
    pub(crate) fn delay_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        let delay = self
            .base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            rand::thread_rng().gen_range(Duration::ZERO..=delay)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(false);

        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1000), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(8))
            .with_max_delay(Duration::from_millis(8));

        for attempt in 1..50 {
            assert!(policy.delay_for(attempt) <= Duration::from_millis(8));
        }
    }

    #[test]
    fn test_busy_policy_never_sleeps() {
        let policy = RetryPolicy::busy();
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(40), Duration::ZERO);
    }

    #[test]
    fn test_attempt_cap() {
        let policy = RetryPolicy::busy().with_max_attempts(3);
        let started = Instant::now();

        assert!(policy.allows_retry(1, started));
        assert!(policy.allows_retry(2, started));
        assert!(!policy.allows_retry(3, started));
    }

    #[test]
    fn test_deadline() {
        let policy = RetryPolicy::busy().with_deadline(Duration::ZERO);
        assert!(!policy.allows_retry(1, Instant::now()));

        let policy = RetryPolicy::busy().with_deadline(Duration::from_secs(3600));
        assert!(policy.allows_retry(1, Instant::now()));
    }

    #[test]
    fn test_unbounded_by_default() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(usize::MAX, Instant::now()));
    }
}
