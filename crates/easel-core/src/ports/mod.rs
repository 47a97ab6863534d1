//! Ports: the abstraction seams of the queue core.
//!
//! Each trait hides an external dependency so it can be swapped in tests:
//! the wall clock, the remote image client, and the durable record store.

pub mod client;
pub mod clock;
pub mod store;

pub use client::ImageClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::QueueStore;
