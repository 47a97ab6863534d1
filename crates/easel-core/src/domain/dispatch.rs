//! Dispatch result shapes: what the remote client returns, how failures are
//! classified, and what gets recorded on a terminal failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes produced by the image client, plus their media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GenerationOutput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

/// Two-way classification of a dispatch failure. Retryable errors go back to
/// the queue with a backoff; permanent errors terminate the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Permanent,
}

/// A classified failure from one dispatch attempt.
///
/// The variants mirror what the upstream actually produces: transient faults
/// (network, throttling, outages, deadline) and request-level rejections
/// (auth, content policy, malformed parameters).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("upstream rate limit: {0}")]
    RateLimited(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl DispatchError {
    /// Classify for the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::Network(_)
            | DispatchError::RateLimited(_)
            | DispatchError::Unavailable(_)
            | DispatchError::Timeout(_) => ErrorClass::Retryable,
            DispatchError::Auth(_)
            | DispatchError::ContentPolicy(_)
            | DispatchError::Malformed(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// What gets persisted on a terminal `FAILED` transition.
///
/// `exhausted` distinguishes "last attempt was retryable but the budget ran
/// out" from "the failure was permanent".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub message: String,
    #[serde(default)]
    pub exhausted: bool,
}

impl DispatchFailure {
    pub fn permanent(error: &DispatchError) -> Self {
        Self {
            message: error.to_string(),
            exhausted: false,
        }
    }

    pub fn exhausted(error: &DispatchError, attempts: u32) -> Self {
        Self {
            message: format!("retries exhausted after {attempts} attempts: {error}"),
            exhausted: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::network(DispatchError::Network("reset".into()))]
    #[case::rate_limited(DispatchError::RateLimited("429".into()))]
    #[case::unavailable(DispatchError::Unavailable("503".into()))]
    #[case::timeout(DispatchError::Timeout(Duration::from_secs(30)))]
    fn transient_errors_are_retryable(#[case] err: DispatchError) {
        assert_eq!(err.class(), ErrorClass::Retryable);
    }

    #[rstest]
    #[case::auth(DispatchError::Auth("bad key".into()))]
    #[case::policy(DispatchError::ContentPolicy("blocked".into()))]
    #[case::malformed(DispatchError::Malformed("bad size".into()))]
    fn request_errors_are_permanent(#[case] err: DispatchError) {
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn exhausted_failure_carries_the_marker() {
        let err = DispatchError::Network("reset".into());
        let failure = DispatchFailure::exhausted(&err, 3);
        assert!(failure.exhausted);
        assert!(failure.message.contains("3 attempts"));

        let failure = DispatchFailure::permanent(&DispatchError::Auth("bad key".into()));
        assert!(!failure.exhausted);
    }
}
