//! Retry policy for the query router.

use std::time::Duration;

/// Wait strategy between two attempts of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `retry_interval`.
    Fixed,
    /// Double the wait after each failed attempt, capped at `max`.
    Exponential { max: Duration },
}

/// Bounds applied to one routed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single resolve-and-query attempt.
    pub per_attempt_timeout: Duration,
    /// Attempt budget; at least 1.
    pub max_attempts: u32,
    /// Base wait before re-resolving after a failed attempt.
    pub retry_interval: Duration,
    pub backoff: Backoff,
    /// Caller-facing ceiling enforced on top of the attempt budget.
    pub overall_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            per_attempt_timeout: Duration::from_secs(1),
            max_attempts: 10,
            retry_interval: Duration::from_millis(100),
            backoff: Backoff::Fixed,
            overall_timeout: Some(Duration::from_secs(20)),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt bounds and default pacing.
    pub fn new(per_attempt_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            per_attempt_timeout,
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.overall_timeout = timeout;
        self
    }

    /// Wait before the next attempt, given how many attempts have failed.
    pub fn delay_before_retry(&self, failed_attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_interval,
            Backoff::Exponential { max } => {
                let shift = failed_attempts.saturating_sub(1).min(31);
                self.retry_interval
                    .checked_mul(1u32 << shift)
                    .unwrap_or(max)
                    .min(max)
            }
        }
    }

    /// Upper bound on the time a query can take under this policy.
    ///
    /// Each attempt spends at most `per_attempt_timeout` resolving and the
    /// same again querying; every attempt but the last is followed by its
    /// retry delay. The overall timeout caps the sum when set.
    pub fn worst_case_latency(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let waits = (1..attempts)
            .map(|failed| self.delay_before_retry(failed))
            .fold(Duration::ZERO, Duration::saturating_add);
        let total = self
            .per_attempt_timeout
            .saturating_mul(2)
            .saturating_mul(attempts)
            .saturating_add(waits);
        match self.overall_timeout {
            Some(ceiling) => total.min(ceiling),
            None => total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_interactive_usage() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.per_attempt_timeout, Duration::from_secs(1));
        assert_eq!(policy.overall_timeout, Some(Duration::from_secs(20)));
        assert_eq!(policy.backoff, Backoff::Fixed);
    }

    #[test]
    fn new_clamps_zero_attempts() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::default().with_retry_interval(Duration::from_millis(50));
        assert_eq!(policy.delay_before_retry(1), Duration::from_millis(50));
        assert_eq!(policy.delay_before_retry(7), Duration::from_millis(50));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_retry_interval(Duration::from_millis(100))
            .with_backoff(Backoff::Exponential {
                max: Duration::from_millis(500),
            });
        assert_eq!(policy.delay_before_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before_retry(3), Duration::from_millis(400));
        assert_eq!(policy.delay_before_retry(4), Duration::from_millis(500));
        assert_eq!(policy.delay_before_retry(40), Duration::from_millis(500));
    }

    #[test]
    fn worst_case_latency_with_fixed_backoff() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 3)
            .with_retry_interval(Duration::from_millis(10))
            .with_overall_timeout(None);
        // 3 attempts of 200ms plus 2 waits of 10ms.
        assert_eq!(policy.worst_case_latency(), Duration::from_millis(620));
    }

    #[test]
    fn worst_case_latency_follows_exponential_delays() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 5)
            .with_retry_interval(Duration::from_millis(100))
            .with_backoff(Backoff::Exponential {
                max: Duration::from_millis(500),
            })
            .with_overall_timeout(None);
        // Waits: 100 + 200 + 400 + 500.
        assert_eq!(policy.worst_case_latency(), Duration::from_millis(1000 + 1200));
    }

    #[test]
    fn worst_case_latency_capped_by_overall_timeout() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.worst_case_latency(), Duration::from_secs(20));

        let single = RetryPolicy::new(Duration::from_millis(50), 1);
        assert_eq!(single.worst_case_latency(), Duration::from_millis(100));
    }
}
