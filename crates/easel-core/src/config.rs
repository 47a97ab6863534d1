//! Queue tuning knobs.

use std::time::Duration;

use crate::throttle::RetryPolicy;

/// Configuration for one queue instance.
///
/// Defaults mirror the upstream free tier this queue was built against:
/// a handful of workers, 15 requests per rolling minute, three attempts per
/// request, and a breaker that trips after three consecutive failures.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrent dispatch workers. Kept low on purpose; the upstream cannot
    /// absorb more anyway.
    pub workers: usize,

    /// Maximum pending records before `enqueue` returns `QueueFull`.
    pub max_pending: usize,

    /// Rate budget: at most `max_per_window` dispatch starts within `window`.
    pub max_per_window: usize,
    pub window: Duration,

    /// Exclusive lease duration for an in-flight record. Expired leases are
    /// reclaimed by the sweeper.
    pub lease_ttl: Duration,

    /// How often the sweeper scans for expired leases.
    pub sweep_interval: Duration,

    /// Idle worker poll interval; also the upper bound on gate waits.
    pub poll_interval: Duration,

    /// Maximum wall time for one remote call before it is treated as a
    /// (retryable) timeout failure.
    pub dispatch_timeout: Duration,

    /// Backoff schedule and default retry budget.
    pub retry: RetryPolicy,

    /// Consecutive failures on one endpoint before the circuit opens.
    pub breaker_threshold: u32,

    /// Cooldown after opening; grows on repeated probe failures, capped.
    pub breaker_cooldown: Duration,
    pub breaker_max_cooldown: Duration,

    /// Poll interval for `wait()`.
    pub wait_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            max_pending: 100,
            max_per_window: 15,
            window: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            dispatch_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(300),
            breaker_max_cooldown: Duration::from_secs(2400),
            wait_poll_interval: Duration::from_millis(100),
        }
    }
}
