//! Reconnection policy: exponential backoff with a cap on both the delay and
//! the number of consecutive attempts.

use std::time::Duration;

/// Backoff settings for the stream consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry after a failure.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Consecutive retries allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30000),
            max_attempts: 5,
        }
    }
}

/// Tracks the retry counter and the delay for the next retry.
///
/// Each [`ReconnectPolicy::next_delay`] hands out the current delay, counts
/// one attempt and doubles the delay for the call after (up to
/// `max_delay`). A successful connection calls [`ReconnectPolicy::reset`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.base_delay;
        Self {
            config,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay to wait before the next retry, or `None` once the attempt cap
    /// has been reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.current_delay;
        self.current_delay = self
            .current_delay
            .saturating_mul(2)
            .min(self.config.max_delay);

        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current_delay = self.config.base_delay;
        self.attempt_count = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay the next retry would wait.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn millis(d: Option<Duration>) -> u128 {
        d.unwrap().as_millis()
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_millis(3000));
        assert_eq!(config.max_delay, Duration::from_millis(30000));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn delays_double_then_cap() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        assert_eq!(millis(policy.next_delay()), 3000);
        assert_eq!(millis(policy.next_delay()), 6000);
        assert_eq!(millis(policy.next_delay()), 12000);
        assert_eq!(millis(policy.next_delay()), 24000);
        assert_eq!(millis(policy.next_delay()), 30000);
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn stops_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..5 {
            assert!(policy.next_delay().is_some());
        }
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn reset_restores_base_delay_and_counter() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(millis(policy.next_delay()), 3000);
    }

    #[test]
    fn zero_attempts_never_retries() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        });
        assert!(policy.next_delay().is_none());
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap_and_never_shrinks(
            base in 1u64..10_000,
            cap in 1u64..100_000,
            attempts in 1u32..40,
        ) {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                base_delay: Duration::from_millis(base),
                max_delay: Duration::from_millis(cap.max(base)),
                max_attempts: attempts,
            });

            let mut last = Duration::ZERO;
            let mut handed_out = 0;
            while let Some(delay) = policy.next_delay() {
                prop_assert!(delay <= Duration::from_millis(cap.max(base)));
                prop_assert!(delay >= last);
                last = delay;
                handed_out += 1;
            }
            prop_assert_eq!(handed_out, attempts);
        }
    }
}
