use std::time::Duration;

/// Default delay before reconnecting a failed source.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// How a source paces itself and recovers from capture failures.
///
/// Failures always tear the connection down and restart it after `backoff`.
/// With `max_consecutive_failures` left at `None` the source retries
/// forever.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between a failure and the next `acquisition_start`.
    pub backoff: Duration,

    /// Target duration of one capture iteration. The loop sleeps for
    /// whatever is left of it after the capture step.
    pub throttle: Option<Duration>,

    /// Give up after this many failures without a successful capture step
    /// in between.
    pub max_consecutive_failures: Option<u32>,
}

impl RetryPolicy {
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_throttle(mut self, interval: Duration) -> Self {
        self.throttle = Some(interval);
        self
    }

    pub fn bounded(mut self, max_consecutive_failures: u32) -> Self {
        self.max_consecutive_failures = Some(max_consecutive_failures);
        self
    }

    /// Remaining part of the throttle interval after `elapsed` was spent
    /// capturing.
    pub fn pause_after(&self, elapsed: Duration) -> Option<Duration> {
        self.throttle
            .and_then(|interval| interval.checked_sub(elapsed))
            .filter(|rest| !rest.is_zero())
    }

    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures
            .map_or(false, |max| consecutive_failures >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            throttle: None,
            max_consecutive_failures: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_retries_forever_after_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff, Duration::from_secs(5));
        assert!(!policy.exhausted(u32::MAX));
    }

    #[test]
    fn pause_is_interval_minus_processing_time() {
        let policy = RetryPolicy::default().with_throttle(Duration::from_millis(100));
        assert_eq!(
            policy.pause_after(Duration::from_millis(30)),
            Some(Duration::from_millis(70))
        );
        assert_eq!(policy.pause_after(Duration::from_millis(100)), None);
        assert_eq!(policy.pause_after(Duration::from_millis(250)), None);
        assert_eq!(RetryPolicy::default().pause_after(Duration::ZERO), None);
    }

    #[test]
    fn bounded_policy_gives_up_at_limit() {
        let policy = RetryPolicy::default().bounded(3);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
