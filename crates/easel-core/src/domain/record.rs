//! Request record: the single durable source of truth for one request.
//!
//! Design:
//! - All state transitions happen through methods here; the store persists
//!   whatever the record says, it never mutates state on its own.
//! - Timestamps are wall-clock `DateTime<Utc>` so records survive a restart;
//!   the clock is always passed in, never read ambiently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dispatch::{DispatchFailure, GenerationOutput};
use super::ids::RequestId;
use super::state::RequestState;

/// Named priority levels. Dispatch order is priority-descending, then
/// submission-time-ascending (FIFO among equals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Numeric weight used for ordering; gaps leave room for custom weights.
    pub fn weight(self) -> i32 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 10,
            Priority::High => 20,
        }
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> i32 {
        p.weight()
    }
}

/// One submitted generation job, as persisted by the queue store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,

    /// Logical upstream endpoint; the circuit breaker is keyed by this.
    pub endpoint: String,

    /// Opaque, caller-validated generation parameters.
    pub payload: serde_json::Value,

    /// Higher dispatches first; ties broken by `submitted_at` ascending.
    pub priority: i32,

    pub state: RequestState,

    /// Dispatch attempts begun so far. Incremented when a dispatch actually
    /// starts (after the admission gates), so a gate requeue costs nothing
    /// and a crash mid-call still counts the attempt.
    pub attempts: u32,

    /// Retry budget for this request.
    pub max_attempts: u32,

    pub submitted_at: DateTime<Utc>,

    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Not selectable for dispatch before this instant (retry backoff).
    #[serde(default)]
    pub next_eligible_at: Option<DateTime<Utc>>,

    /// Exclusive lease expiry while `InProgress`. A record whose lease has
    /// expired without a terminal transition is reclaimed to `Pending`.
    #[serde(default)]
    pub leased_until: Option<DateTime<Utc>>,

    /// Populated exactly once, on the terminal transition.
    #[serde(default)]
    pub result: Option<GenerationOutput>,

    #[serde(default)]
    pub error: Option<DispatchFailure>,
}

impl RequestRecord {
    pub fn new(
        id: RequestId,
        endpoint: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            payload,
            priority,
            state: RequestState::Pending,
            attempts: 0,
            max_attempts,
            submitted_at: now,
            last_attempt_at: None,
            completed_at: None,
            next_eligible_at: None,
            leased_until: None,
            result: None,
            error: None,
        }
    }

    /// Eligible for lease acquisition at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state.is_pending() && self.next_eligible_at.is_none_or(|t| t <= now)
    }

    /// `InProgress` with an expired (or missing) lease: the worker crashed.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == RequestState::InProgress && self.leased_until.is_none_or(|t| t <= now)
    }

    /// Pending -> InProgress under an exclusive lease. Attempts are not
    /// touched here; an admission-gate requeue must not consume the budget.
    pub fn begin_lease(&mut self, leased_until: DateTime<Utc>) {
        debug_assert!(self.state.is_pending());
        self.state = RequestState::InProgress;
        self.leased_until = Some(leased_until);
        self.next_eligible_at = None;
    }

    /// The dispatch is actually going out: consume one attempt. Persisted
    /// before the remote call so a crash mid-call still counts it.
    pub fn begin_dispatch(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.state, RequestState::InProgress);
        self.attempts += 1;
        self.last_attempt_at = Some(now);
    }

    /// InProgress -> Pending: release the lease and requeue, optionally not
    /// re-selectable before `eligible_at` (retry backoff).
    pub fn release(&mut self, eligible_at: Option<DateTime<Utc>>) {
        self.state = RequestState::Pending;
        self.leased_until = None;
        self.next_eligible_at = eligible_at;
    }

    /// Terminal success.
    pub fn complete(&mut self, now: DateTime<Utc>, output: GenerationOutput) {
        self.state = RequestState::Succeeded;
        self.result = Some(output);
        self.completed_at = Some(now);
        self.leased_until = None;
    }

    /// Terminal failure (permanent, or retries exhausted).
    pub fn fail(&mut self, now: DateTime<Utc>, failure: DispatchFailure) {
        self.state = RequestState::Failed;
        self.error = Some(failure);
        self.completed_at = Some(now);
        self.leased_until = None;
    }

    /// Pending -> Cancelled. The store validates the state before calling.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.state.is_pending());
        self.state = RequestState::Cancelled;
        self.completed_at = Some(now);
    }

    /// Attempts left in the retry budget?
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
