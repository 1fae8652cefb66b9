//! Retry Policy
//!
//! Attempt budget and the delay inserted before each retried attempt.

use backoff::ExponentialBackoff;
use std::fmt;
use std::time::Duration;

/// Bounded retry budget with exponential delays
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`
    pub max_retries: u32,

    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_interval: Duration,
        multiplier: f64,
        max_interval: Duration,
    ) -> Self {
        let backoff = ExponentialBackoff {
            initial_interval,
            multiplier,
            max_interval,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        Self {
            max_retries,
            backoff,
        }
    }

    /// Same policy with a different attempt budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay after the failed attempt with 0-based index `attempt`:
    /// `initial * multiplier^attempt`, clamped to the max interval.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial = self.backoff.initial_interval.as_millis() as f64;
        let cap = self.backoff.max_interval.as_millis() as f64;
        let exponent = attempt.min(64) as i32;
        let millis = (initial * self.backoff.multiplier.powi(exponent)).min(cap);

        Duration::from_millis(millis as u64)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_interval", &self.backoff.initial_interval)
            .field("multiplier", &self.backoff.multiplier)
            .field("max_interval", &self.backoff.max_interval)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Duration::from_millis(1000),
            2.0,
            Duration::from_secs(60),
        )
    }
}
