//! Queue store port: the single source of truth for request records.
//!
//! Design intent:
//! - Every mutation is a single-record atomic transition under the store's
//!   own lock; no lock is ever held across a remote call.
//! - `claim_next` is the concurrency-critical operation: select-and-lease
//!   must be one atomic step so two workers can never hold the same record.
//! - Implementations decide durability (`MemoryStore` forgets on drop,
//!   `JsonFileStore` survives a restart).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{RequestId, RequestRecord};
use crate::error::QueueError;
use crate::store::QueueCounts;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new `Pending` record. Fails with `QueueFull` if the store
    /// already holds `max_pending` pending records; the capacity check and
    /// the insert are one atomic step.
    async fn insert(&self, record: RequestRecord, max_pending: usize) -> Result<(), QueueError>;

    /// Read-only snapshot of one record.
    async fn get(&self, id: RequestId) -> Result<Option<RequestRecord>, QueueError>;

    /// Write back a record the caller holds a lease on (or has just
    /// transitioned). Replaces by id.
    async fn update(&self, record: RequestRecord) -> Result<(), QueueError>;

    /// Atomically select the best eligible `Pending` record (highest
    /// priority, then oldest submission), transition it to `InProgress` with
    /// a lease expiring at `lease_until`, and return it. `None` when nothing
    /// is eligible at `now`.
    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<RequestRecord>, QueueError>;

    /// Cancel a `Pending` record. `NotFound` for unknown ids,
    /// `InvalidState` once the record is in flight or terminal.
    async fn cancel(&self, id: RequestId, now: DateTime<Utc>) -> Result<RequestRecord, QueueError>;

    /// Revert every `InProgress` record whose lease expired before `now`
    /// back to `Pending` (attempts stay as-is). Returns the reclaimed ids.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, QueueError>;

    /// Startup recovery pass: treat every `InProgress` record as
    /// lease-expired, whatever its lease says. Returns how many were reset.
    async fn recover(&self, now: DateTime<Utc>) -> Result<usize, QueueError>;

    /// Counts by state, for the operational snapshot.
    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}
