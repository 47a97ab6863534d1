//! Retry policy: exponential backoff with jitter.
//!
//! delay(attempt) = min(base * multiplier^(attempt - 1), max) + jitter,
//! where jitter is a random perturbation in [0, jitter_fraction * delay).
//! The jitter desynchronizes retries across many queued requests so they do
//! not all come back at the same instant.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries allowed per request (first attempt included).
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Cap on the computed delay, before jitter.
    pub max_delay: Duration,

    /// Backoff multiplier per attempt.
    pub multiplier: f64,

    /// Jitter as a fraction of the computed delay, in [0, 1].
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before re-selecting a record that just finished `attempt`
    /// (1-indexed: the first failure passes 1).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jitter_cap = capped * self.jitter_fraction;
        let jitter = if jitter_cap > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_cap)
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }
}
