//! Request state machine.

use serde::{Deserialize, Serialize};

/// State of a request in the queue.
///
/// Transitions are monotonic:
/// - Pending -> InProgress -> Succeeded
/// - Pending -> InProgress -> Pending (retryable failure, requeued)
/// - Pending -> InProgress -> Failed (permanent failure or retries exhausted)
/// - Pending -> Cancelled
///
/// No state is re-entered once left, except Pending via the requeue loop.
/// Serialized in SCREAMING_SNAKE_CASE so persisted records read as
/// PENDING / IN_PROGRESS / SUCCEEDED / FAILED / CANCELLED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    /// Waiting to be dispatched (possibly delayed by a retry backoff).
    Pending,

    /// Exclusively leased by one worker, dispatch in flight.
    InProgress,

    /// Terminal: result stored.
    Succeeded,

    /// Terminal: error stored.
    Failed,

    /// Terminal: cancelled before dispatch.
    Cancelled,
}

impl RequestState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::Failed | RequestState::Cancelled
        )
    }

    /// Eligible for lease acquisition (subject to `next_eligible_at`).
    pub fn is_pending(self) -> bool {
        matches!(self, RequestState::Pending)
    }
}
