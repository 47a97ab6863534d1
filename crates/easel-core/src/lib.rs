//! easel-core
//!
//! An admission-controlled, durable request queue that fronts a rate-limited
//! image-generation API. Callers enqueue generation requests and get an id
//! back immediately; a small worker pool dispatches them in priority order,
//! under a sliding rate budget and a per-endpoint circuit breaker, with
//! exponential-backoff retries. Queue contents survive a restart; throttling
//! state is ephemeral and rebuilt from scratch.
//!
//! # Module layout
//! - **domain**: ids, request state machine, the durable `RequestRecord`,
//!   dispatch result/error shapes
//! - **ports**: abstraction seams (`Clock`, `ImageClient`, `QueueStore`)
//! - **store**: `MemoryStore` (tests/dev) and `JsonFileStore` (durable)
//! - **throttle**: `RateLimiter`, `CircuitBreaker`, `RetryPolicy`
//! - **manager**: `QueueManager` and its worker/sweeper loops
//! - **config** / **error**: tuning knobs and the caller-facing error taxonomy

pub mod config;
pub mod domain;
pub mod error;
pub mod manager;
pub mod ports;
pub mod store;
pub mod throttle;

pub use config::QueueConfig;
pub use domain::{
    DispatchError, DispatchFailure, GenerationOutput, Priority, RequestId, RequestRecord,
    RequestState,
};
pub use error::QueueError;
pub use manager::{NewRequest, QueueManager, QueueSnapshot};
pub use ports::{Clock, ImageClient, ManualClock, QueueStore, SystemClock};
pub use store::{JsonFileStore, MemoryStore, QueueCounts};
pub use throttle::{Admission, CircuitBreaker, CircuitState, RateLimiter, RetryPolicy, Verdict};
