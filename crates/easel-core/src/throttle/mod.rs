//! Admission control: rate budget, circuit breaking, retry backoff.
//!
//! All state here is process-wide and ephemeral by design: a restart starts
//! from a clean window and closed circuits, and the budget only becomes
//! conservative again as the real window refills. Each piece is an explicit
//! shared object with its own lock, never a global, so independent queue
//! instances can coexist in tests.

mod breaker;
mod limiter;
mod retry;

pub use breaker::{CircuitBreaker, CircuitState, Verdict};
pub use limiter::{Admission, RateLimiter};
pub use retry::RetryPolicy;
