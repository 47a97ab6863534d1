//! In-memory store: single source of truth behind one async mutex.
//!
//! Used by tests and by deployments that accept losing the queue on restart.
//! Selection and lease acquisition happen inside the lock, so a claim is
//! atomic with respect to every other worker.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{QueueCounts, select_eligible};
use crate::domain::{RequestId, RequestRecord};
use crate::error::QueueError;
use crate::ports::QueueStore;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RequestId, RequestRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert(&self, record: RequestRecord, max_pending: usize) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        let pending = records.values().filter(|r| r.state.is_pending()).count();
        if pending >= max_pending {
            return Err(QueueError::QueueFull {
                capacity: max_pending,
            });
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: RequestId) -> Result<Option<RequestRecord>, QueueError> {
        let records = self.records.lock().await;
        Ok(records.get(&id).cloned())
    }

    async fn update(&self, record: RequestRecord) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        if !records.contains_key(&record.id) {
            return Err(QueueError::NotFound(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<RequestRecord>, QueueError> {
        let mut records = self.records.lock().await;
        let Some(id) = select_eligible(records.values(), now) else {
            return Ok(None);
        };
        let record = records
            .get_mut(&id)
            .ok_or(QueueError::NotFound(id))?;
        record.begin_lease(lease_until);
        Ok(Some(record.clone()))
    }

    async fn cancel(&self, id: RequestId, now: DateTime<Utc>) -> Result<RequestRecord, QueueError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        if !record.state.is_pending() {
            return Err(QueueError::InvalidState {
                id,
                state: record.state,
            });
        }
        record.cancel(now);
        Ok(record.clone())
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>, QueueError> {
        let mut records = self.records.lock().await;
        let mut reclaimed = Vec::new();
        for record in records.values_mut() {
            if record.lease_expired(now) {
                record.release(None);
                reclaimed.push(record.id);
            }
        }
        Ok(reclaimed)
    }

    async fn recover(&self, _now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut records = self.records.lock().await;
        let mut reset = 0;
        for record in records.values_mut() {
            if record.state == crate::domain::RequestState::InProgress {
                record.release(None);
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let records = self.records.lock().await;
        Ok(QueueCounts::tally(records.values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use chrono::TimeDelta;

    fn record(now: DateTime<Utc>, priority: Priority) -> RequestRecord {
        RequestRecord::new(
            RequestId::generate(),
            "generate",
            serde_json::json!({}),
            priority.weight(),
            3,
            now,
        )
    }

    #[tokio::test]
    async fn insert_enforces_capacity() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert(record(now, Priority::Normal), 1).await.unwrap();

        let err = store
            .insert(record(now, Priority::Normal), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueFull { capacity: 1 }));
    }

    #[tokio::test]
    async fn terminal_records_do_not_count_against_capacity() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut done = record(now, Priority::Normal);
        done.begin_lease(now + TimeDelta::seconds(120));
        done.complete(
            now,
            crate::domain::GenerationOutput::new(vec![0], "image/png"),
        );
        store.insert(record(now, Priority::Normal), 2).await.unwrap();
        store.update(done.clone()).await.unwrap_err(); // not inserted yet

        store.insert(done, 2).await.unwrap();
        store.insert(record(now, Priority::Normal), 2).await.unwrap();
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let r = record(now, Priority::Normal);
        let id = r.id;
        store.insert(r, 10).await.unwrap();

        let lease_until = now + TimeDelta::seconds(120);
        let first = store.claim_next(now, lease_until).await.unwrap().unwrap();
        assert_eq!(first.id, id);
        assert_eq!(first.state, crate::domain::RequestState::InProgress);

        // Nothing left to claim while the lease is held.
        assert!(store.claim_next(now, lease_until).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_order_is_priority_then_fifo() {
        let store = MemoryStore::new();
        let base = Utc::now();
        let low = record(base, Priority::Low);
        let normal_old = record(base + TimeDelta::milliseconds(1), Priority::Normal);
        let normal_new = record(base + TimeDelta::milliseconds(2), Priority::Normal);
        let high = record(base + TimeDelta::milliseconds(3), Priority::High);

        let expected = vec![high.id, normal_old.id, normal_new.id, low.id];
        for r in [low, normal_old, normal_new, high] {
            store.insert(r, 10).await.unwrap();
        }

        let now = base + TimeDelta::seconds(1);
        let mut order = Vec::new();
        while let Some(r) = store
            .claim_next(now, now + TimeDelta::seconds(120))
            .await
            .unwrap()
        {
            order.push(r.id);
        }
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn cancel_only_works_on_pending() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let r = record(now, Priority::Normal);
        let id = r.id;
        store.insert(r, 10).await.unwrap();

        store
            .claim_next(now, now + TimeDelta::seconds(120))
            .await
            .unwrap()
            .unwrap();
        let err = store.cancel(id, now).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidState { .. }));

        let missing = RequestId::generate();
        let err = store.cancel(missing, now).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn reclaim_reverts_only_expired_leases() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let a = record(now, Priority::Normal);
        let b = record(now + TimeDelta::milliseconds(1), Priority::Normal);
        let a_id = a.id;
        store.insert(a, 10).await.unwrap();
        store.insert(b, 10).await.unwrap();

        // a gets a short lease, b a long one.
        store
            .claim_next(now, now + TimeDelta::seconds(1))
            .await
            .unwrap()
            .unwrap();
        store
            .claim_next(now, now + TimeDelta::seconds(300))
            .await
            .unwrap()
            .unwrap();

        let later = now + TimeDelta::seconds(2);
        let reclaimed = store.reclaim_expired(later).await.unwrap();
        assert_eq!(reclaimed, vec![a_id]);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.in_progress, 1);
    }
}
