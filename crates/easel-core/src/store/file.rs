//! Durable JSON-file store.
//!
//! The whole record set is snapshotted to one JSON file on every mutation,
//! written to a sibling temp file and renamed into place so a crash can never
//! leave a half-written snapshot behind. At the volumes this queue handles
//! (tens of requests per minute) rewriting the file is far below the noise
//! floor of a single remote call.
//!
//! A file that exists but fails to parse is a startup error: queued work is
//! never silently dropped.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{QueueCounts, select_eligible};
use crate::domain::{RequestId, RequestRecord, RequestState};
use crate::error::QueueError;
use crate::ports::QueueStore;

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<HashMap<RequestId, RequestRecord>>,
}

impl JsonFileStore {
    /// Open (or create) the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) => {
                let list: Vec<RequestRecord> = serde_json::from_slice(&bytes).map_err(|e| {
                    QueueError::Persistence(format!(
                        "corrupt queue snapshot at {}: {e}",
                        path.display()
                    ))
                })?;
                list.into_iter().map(|r| (r.id, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(QueueError::Persistence(format!(
                    "cannot read queue snapshot at {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Serialize the current record set and atomically replace the snapshot.
    /// The file writes and fsync run on the blocking pool so they never park
    /// an executor thread.
    async fn persist(
        path: &Path,
        records: &HashMap<RequestId, RequestRecord>,
    ) -> Result<(), QueueError> {
        let mut list: Vec<&RequestRecord> = records.values().collect();
        // Stable on-disk order keeps snapshots diffable.
        list.sort_by_key(|r| r.id);
        let bytes = serde_json::to_vec_pretty(&list)
            .map_err(|e| QueueError::Persistence(format!("encode queue snapshot: {e}")))?;

        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let tmp = path.with_extension("json.tmp");
            let io_err = |e: std::io::Error| {
                QueueError::Persistence(format!(
                    "write queue snapshot at {}: {e}",
                    path.display()
                ))
            };
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&bytes).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
            fs::rename(&tmp, &path).map_err(io_err)
        })
        .await
        .map_err(|e| QueueError::Persistence(format!("snapshot writer task: {e}")))?
    }
}

#[async_trait]
impl QueueStore for JsonFileStore {
    async fn insert(&self, record: RequestRecord, max_pending: usize) -> Result<(), QueueError> {
        let mut records = self.records.lock().await;
        let pending = records.values().filter(|r| r.state.is_pending()).count();
        if pending >= max_pending {
            return Err(QueueError::QueueFull {
                capacity: max_pending,
            });
        }
        records.insert(record.id, record);
        Self::persist(&self.path, &records).await
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
        Self::persist(&self.path, &records).await
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
        let claimed = {
            let record = records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
            record.begin_lease(lease_until);
            record.clone()
        };
        Self::persist(&self.path, &records).await?;
        Ok(Some(claimed))
    }

    async fn cancel(&self, id: RequestId, now: DateTime<Utc>) -> Result<RequestRecord, QueueError> {
        let mut records = self.records.lock().await;
        let cancelled = {
            let record = records.get_mut(&id).ok_or(QueueError::NotFound(id))?;
            if !record.state.is_pending() {
                return Err(QueueError::InvalidState {
                    id,
                    state: record.state,
                });
            }
            record.cancel(now);
            record.clone()
        };
        Self::persist(&self.path, &records).await?;
        Ok(cancelled)
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
        if !reclaimed.is_empty() {
            Self::persist(&self.path, &records).await?;
        }
        Ok(reclaimed)
    }

    async fn recover(&self, _now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut records = self.records.lock().await;
        let mut reset = 0;
        for record in records.values_mut() {
            if record.state == RequestState::InProgress {
                record.release(None);
                reset += 1;
            }
        }
        if reset > 0 {
            Self::persist(&self.path, &records).await?;
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
    use ulid::Ulid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("easel-store-{}.json", Ulid::new()))
    }

    fn record(now: DateTime<Utc>) -> RequestRecord {
        RequestRecord::new(
            RequestId::generate(),
            "generate",
            serde_json::json!({"prompt": "a fox"}),
            Priority::Normal.weight(),
            3,
            now,
        )
    }

    #[tokio::test]
    async fn records_survive_a_reopen() {
        let path = temp_path();
        let now = Utc::now();
        let r = record(now);
        let id = r.id;
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.insert(r, 10).await.unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.state, RequestState::Pending);

        fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn recovery_resets_in_progress_exactly_once() {
        let path = temp_path();
        let now = Utc::now();
        let r = record(now);
        let id = r.id;
        {
            // Simulated crash: claim a record, then drop the store without
            // ever writing a terminal state.
            let store = JsonFileStore::open(&path).unwrap();
            store.insert(r, 10).await.unwrap();
            store
                .claim_next(now, now + TimeDelta::seconds(300))
                .await
                .unwrap()
                .unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.recover(now).await.unwrap(), 1);
        let recovered = store.get(id).await.unwrap().unwrap();
        assert_eq!(recovered.state, RequestState::Pending);
        assert!(recovered.leased_until.is_none());

        // Second pass finds nothing: recovered exactly once, not duplicated.
        assert_eq!(store.recover(now).await.unwrap(), 0);
        assert_eq!(store.counts().await.unwrap().pending, 1);

        fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_loud_error() {
        let path = temp_path();
        fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, QueueError::Persistence(_)));
        assert!(err.to_string().contains("corrupt"));

        fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn terminal_result_round_trips_through_disk() {
        let path = temp_path();
        let now = Utc::now();
        let r = record(now);
        let id = r.id;
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.insert(r, 10).await.unwrap();
            let mut claimed = store
                .claim_next(now, now + TimeDelta::seconds(300))
                .await
                .unwrap()
                .unwrap();
            claimed.begin_dispatch(now);
            claimed.complete(
                now,
                crate::domain::GenerationOutput::new(vec![137, 80, 78, 71], "image/png"),
            );
            store.update(claimed).await.unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        let done = store.get(id).await.unwrap().unwrap();
        assert_eq!(done.state, RequestState::Succeeded);
        assert_eq!(done.attempts, 1);
        let output = done.result.unwrap();
        assert_eq!(output.bytes, vec![137, 80, 78, 71]);
        assert_eq!(output.mime_type, "image/png");

        fs::remove_file(&path).ok();
    }
}
