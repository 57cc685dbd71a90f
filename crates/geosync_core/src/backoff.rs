//! Retry backoff policy shared by sync and verification.

use crate::clock::duration_millis;
use crate::types::Timestamp;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progressive backoff with jitter.
///
/// The delay after the `n`th consecutive failure is
///
/// ```text
/// n^4 s + base + step * n + U[0, step)
/// ```
///
/// capped at `max_delay`. Because the jitter window never exceeds `step`, the
/// smallest possible delay for `n + 1` is larger than the largest possible
/// delay for `n`, so delays never decrease as failures accumulate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Fixed delay added to every retry.
    #[serde(with = "crate::config::duration_secs")]
    pub base_delay: Duration,
    /// Per-failure linear step, also the width of the jitter window.
    #[serde(with = "crate::config::duration_secs")]
    pub step: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "crate::config::duration_secs")]
    pub max_delay: Duration,
    /// Whether to add random jitter.
    pub add_jitter: bool,
}

impl BackoffPolicy {
    /// Creates the default policy: 15 s base, 30 s step, 7 day cap.
    pub fn new() -> Self {
        Self {
            base_delay: Duration::from_secs(15),
            step: Duration::from_secs(30),
            max_delay: Duration::from_secs(7 * 24 * 60 * 60),
            add_jitter: true,
        }
    }

    /// Creates a policy without jitter, for deterministic tests.
    pub fn deterministic() -> Self {
        Self {
            add_jitter: false,
            ..Self::new()
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the per-failure step.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the delay before retrying after `retry_count` failures.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let polynomial = Duration::from_secs(u64::from(retry_count).saturating_pow(4));
        let linear = self.step.checked_mul(retry_count).unwrap_or(Duration::MAX);

        let mut delay = polynomial
            .saturating_add(self.base_delay)
            .saturating_add(linear);

        if self.add_jitter {
            let window = duration_millis(self.step);
            if window > 0 {
                let jitter = rand::thread_rng().gen_range(0..window);
                delay = delay.saturating_add(Duration::from_millis(jitter));
            }
        }

        delay.min(self.max_delay)
    }

    /// Returns when the next attempt becomes due.
    pub fn next_retry_at(&self, now: Timestamp, retry_count: u32) -> Timestamp {
        now.saturating_add(duration_millis(self.delay_for(retry_count)))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_delays() {
        let policy = BackoffPolicy::deterministic();
        // 1 + 15 + 30
        assert_eq!(policy.delay_for(1), Duration::from_secs(46));
        // 16 + 15 + 60
        assert_eq!(policy.delay_for(2), Duration::from_secs(91));
    }

    #[test]
    fn jittered_delay_stays_in_window() {
        let policy = BackoffPolicy::new();
        for _ in 0..100 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_secs(46));
            assert!(delay < Duration::from_secs(76));
        }
    }

    #[test]
    fn delays_never_decrease() {
        let policy = BackoffPolicy::new();
        let mut previous = Duration::ZERO;
        for count in 0..200 {
            let delay = policy.delay_for(count);
            assert!(delay >= previous, "delay for {count} decreased");
            previous = delay;
        }
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy::new();
        assert_eq!(policy.delay_for(10_000), policy.max_delay);
        assert_eq!(policy.delay_for(u32::MAX), policy.max_delay);
    }

    #[test]
    fn next_retry_at_adds_delay() {
        let policy = BackoffPolicy::deterministic();
        assert_eq!(policy.next_retry_at(1_000, 1), 1_000 + 46_000);
        assert_eq!(policy.next_retry_at(u64::MAX, 1), u64::MAX);
    }
}
