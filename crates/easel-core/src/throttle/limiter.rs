//! Sliding-window rate limiter.
//!
//! Tracks the timestamps of recent dispatch starts, pruned lazily to the
//! trailing window. Acquire happens at dispatch start, not dispatch success:
//! failed calls still consume upstream quota, so they consume ours too.
//!
//! The limiter never blocks; it reports how long until the budget frees up
//! and leaves the waiting to the worker loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::ports::Clock;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Budget available; the dispatch timestamp has been recorded.
    Permitted,

    /// Budget exhausted; earliest instant a slot frees up is `retry_after`
    /// from now.
    Throttled { retry_after: Duration },
}

pub struct RateLimiter {
    max_per_window: usize,
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    starts: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_per_window,
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            clock,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to claim one dispatch slot. On permit the slot is consumed by the
    /// call itself.
    pub fn try_acquire(&self) -> Admission {
        let now = self.clock.now();
        let mut starts = self.starts.lock().expect("limiter mutex poisoned");
        Self::prune(&mut starts, now, self.window);

        if starts.len() < self.max_per_window {
            starts.push_back(now);
            return Admission::Permitted;
        }

        Admission::Throttled {
            retry_after: Self::until_oldest_expires(&starts, now, self.window),
        }
    }

    /// Slots still free in the current window. Purely informational.
    pub fn remaining(&self) -> usize {
        let now = self.clock.now();
        let mut starts = self.starts.lock().expect("limiter mutex poisoned");
        Self::prune(&mut starts, now, self.window);
        self.max_per_window.saturating_sub(starts.len())
    }

    /// Estimated wait until a dispatch would be permitted; zero when the
    /// budget has room right now.
    pub fn estimated_wait(&self) -> Duration {
        let now = self.clock.now();
        let mut starts = self.starts.lock().expect("limiter mutex poisoned");
        Self::prune(&mut starts, now, self.window);
        if starts.len() < self.max_per_window {
            Duration::ZERO
        } else {
            Self::until_oldest_expires(&starts, now, self.window)
        }
    }

    fn prune(starts: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: TimeDelta) {
        // Entries are appended in time order, so the stale ones are in front.
        while let Some(&oldest) = starts.front() {
            if now - oldest < window {
                break;
            }
            starts.pop_front();
        }
    }

    fn until_oldest_expires(
        starts: &VecDeque<DateTime<Utc>>,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Duration {
        let Some(&oldest) = starts.front() else {
            return Duration::ZERO;
        };
        (oldest + window - now).to_std().unwrap_or(Duration::ZERO)
    }
}
