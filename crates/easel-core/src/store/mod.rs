//! Store implementations and shared selection logic.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RequestId, RequestRecord, RequestState};

/// Counts by state, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueCounts {
    pub(crate) fn tally<'a>(records: impl Iterator<Item = &'a RequestRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.state {
                RequestState::Pending => counts.pending += 1,
                RequestState::InProgress => counts.in_progress += 1,
                RequestState::Succeeded => counts.succeeded += 1,
                RequestState::Failed => counts.failed += 1,
                RequestState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

/// Selection policy shared by the store implementations: among records
/// eligible at `now`, highest priority wins, ties go to the oldest
/// submission, then the smaller id for determinism.
pub(crate) fn select_eligible<'a>(
    records: impl Iterator<Item = &'a RequestRecord>,
    now: DateTime<Utc>,
) -> Option<RequestId> {
    let mut best: Option<&RequestRecord> = None;
    for record in records.filter(|r| r.is_eligible(now)) {
        let replace = match best {
            None => true,
            Some(current) => {
                record.priority > current.priority
                    || (record.priority == current.priority
                        && (record.submitted_at, record.id) < (current.submitted_at, current.id))
            }
        };
        if replace {
            best = Some(record);
        }
    }
    best.map(|r| r.id)
}
