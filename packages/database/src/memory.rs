//! Process-local [`SampleStore`] used by tests and dry-run ingestion.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use smart_mining_database_models::{MAX_RECENT_LIMIT, SampleRow};
use smart_mining_sample_models::SampleRecord;

use crate::{DbError, SampleStore};

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<SampleRow>,
    next_id: i64,
}

/// Keeps samples in a `Vec` behind a mutex.
///
/// Mirrors the table's conflict handling: a record whose id already exists
/// (or appears earlier in the batch) is skipped and not counted.
#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    state: Mutex<MemoryState>,
}

impl InMemorySampleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    /// Whether nothing has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    /// Every stored row in insertion order.
    #[must_use]
    pub fn rows(&self) -> Vec<SampleRow> {
        self.lock().rows.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SampleStore for InMemorySampleStore {
    async fn insert_many(&self, records: &[SampleRecord]) -> Result<u64, DbError> {
        let mut state = self.lock();

        let mut seen: BTreeSet<i64> = state.rows.iter().map(|row| row.id).collect();
        let created_at = chrono::Utc::now().naive_utc();
        let mut next_id = state
            .next_id
            .max(seen.last().copied().unwrap_or(0))
            .max(records.iter().filter_map(SampleRecord::id).max().unwrap_or(0));
        let mut inserted = 0u64;

        for record in records {
            let id = match record.id() {
                Some(id) if !seen.insert(id) => {
                    log::trace!("Skipping duplicate sample id {id}");
                    continue;
                }
                Some(id) => id,
                None => {
                    next_id += 1;
                    seen.insert(next_id);
                    next_id
                }
            };
            state
                .rows
                .push(SampleRow::from_record(id, record, created_at));
            inserted += 1;
        }
        state.next_id = next_id;

        Ok(inserted)
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<SampleRow>, DbError> {
        let limit = limit.min(MAX_RECENT_LIMIT) as usize;
        Ok(self.lock().rows.iter().rev().take(limit).cloned().collect())
    }
}
