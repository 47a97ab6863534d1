//! Image client port: the external generator the queue dispatches to.

use async_trait::async_trait;

use crate::domain::{DispatchError, GenerationOutput};

/// The remote image-generation call.
///
/// Contract:
/// - Must be safe to call repeatedly with an identical payload; retried calls
///   may produce different pixels, which is acceptable for this domain.
/// - Failures come back pre-classified as a `DispatchError`; the queue never
///   inspects raw upstream errors.
/// - The queue bounds each call with its own dispatch timeout, so an
///   implementation without an internal deadline is still safe to drive.
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<GenerationOutput, DispatchError>;
}
