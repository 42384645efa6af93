use std::time;

#[derive(Copy, Clone, Debug)]
/// The retry policy an `ApiClient` follows when a service answers with a rate
/// limit or a server error.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
    /// Total number of attempts for one request, including the first one.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// A policy that sends every request exactly once.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a request that already ran `attempt` times (starting at 1) may run again.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculate the time to wait before the next attempt.
    /// `attempt` counts the retries already made, so the first retry passes 0.
    pub fn time_until_next_retry(
        &self,
        attempt: u32,
        preferred_retry_interval: Option<time::Duration>,
    ) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt));

        match (preferred_retry_interval, self.maximum_interval) {
            (Some(duration), Some(max_interval)) => std::cmp::min(
                std::cmp::max(std::cmp::min(candidate_interval, max_interval), duration),
                max_interval,
            ),
            (Some(duration), None) => std::cmp::max(candidate_interval, duration),
            (None, Some(max_interval)) => std::cmp::min(candidate_interval, max_interval),
            (None, None) => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: Some(time::Duration::from_secs(60)),
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_backoff_grows_with_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), None, 5);

        assert_eq!(policy.time_until_next_retry(0, None), Duration::from_millis(100));
        assert_eq!(policy.time_until_next_retry(1, None), Duration::from_millis(200));
        assert_eq!(policy.time_until_next_retry(3, None), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped_by_maximum_interval() {
        let policy = RetryPolicy::new(
            2,
            Duration::from_secs(1),
            Some(Duration::from_secs(5)),
            10,
        );

        assert_eq!(policy.time_until_next_retry(6, None), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_hint_wins_when_longer() {
        let policy = RetryPolicy::new(
            2,
            Duration::from_secs(1),
            Some(Duration::from_secs(30)),
            5,
        );

        assert_eq!(
            policy.time_until_next_retry(0, Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        // The hint never pushes past the cap.
        assert_eq!(
            policy.time_until_next_retry(0, Some(Duration::from_secs(120))),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), None, 3);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retries().should_retry(1));
    }

    #[test]
    fn test_zero_attempts_still_sends_once() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), None, 0);

        assert_eq!(policy.max_attempts(), 1);
    }
}
