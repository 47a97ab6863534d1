//! Caller-facing error taxonomy.
//!
//! Only enqueue-time and query-time errors propagate to the caller. Rate
//! limiting and circuit opening are internal signals: the worker absorbs them
//! into a requeue-and-wait, they never surface here.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{RequestId, RequestState};

#[derive(Debug, Error)]
pub enum QueueError {
    /// The configured maximum pending count was exceeded at enqueue time.
    #[error("queue is full ({capacity} pending requests)")]
    QueueFull { capacity: usize },

    #[error("request {0} not found")]
    NotFound(RequestId),

    /// A transition was requested on a record whose state forbids it
    /// (e.g. cancelling an in-flight or terminal request).
    #[error("request {id} is {state:?} and cannot be transitioned")]
    InvalidState { id: RequestId, state: RequestState },

    /// `wait()` gave up before the request reached a terminal state.
    #[error("request {id} did not complete within {timeout:?}")]
    WaitTimeout { id: RequestId, timeout: Duration },

    /// The durable store is unusable. Surfaced loudly at startup rather than
    /// silently dropping queued work.
    #[error("persistence failure: {0}")]
    Persistence(String),
}
