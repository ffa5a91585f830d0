//! Fixed-delay reconnect policy bounded by the server's grace period.

use std::time::Duration;

/// Controls how the client reconnects after an abnormal closure.
///
/// The first retry is immediate; every later one waits `delay`.  After
/// `max_attempts` consecutive failures the session is considered lost,
/// which by default happens once the server's grace period has run out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_grace_period(Duration::from_secs(60), Duration::from_secs(6))
    }
}

impl ReconnectPolicy {
    /// `max_attempts = floor(grace_period / delay)`.
    pub fn from_grace_period(grace_period: Duration, delay: Duration) -> Self {
        let max_attempts = grace_period
            .as_nanos()
            .checked_div(delay.as_nanos())
            .map_or(0, |n| n.min(u32::MAX as u128) as u32);
        Self {
            delay,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Whether attempt number `attempt` exceeds the bound.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_covers_grace_period() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay, Duration::from_secs(6));
        assert_eq!(p.max_attempts, 10);
    }

    #[test]
    fn first_retry_is_immediate() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(6));
        assert_eq!(p.delay_for_attempt(9), Duration::from_secs(6));
    }

    #[test]
    fn attempts_round_down() {
        let p = ReconnectPolicy::from_grace_period(Duration::from_secs(10), Duration::from_secs(4));
        assert_eq!(p.max_attempts, 2);
        assert!(!p.should_give_up(1));
        assert!(p.should_give_up(2));
    }

    #[test]
    fn zero_delay_never_retries() {
        let p = ReconnectPolicy::from_grace_period(Duration::from_secs(60), Duration::ZERO);
        assert!(p.should_give_up(0));
    }

    #[test]
    fn sub_millisecond_delay_is_counted_in_full() {
        let p = ReconnectPolicy::from_grace_period(
            Duration::from_secs(60),
            Duration::from_micros(500),
        );
        assert_eq!(p.max_attempts, 120_000);
    }

    #[test]
    fn huge_ratio_saturates() {
        let p = ReconnectPolicy::from_grace_period(Duration::MAX, Duration::from_nanos(1));
        assert_eq!(p.max_attempts, u32::MAX);
    }
}
