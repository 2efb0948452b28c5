//! InMemoryVoteStore - テスト用の投票テーブル
//!
//! Rows are kept in insertion order with a monotonic id, like the `votes`
//! table. Failures can be injected to exercise the requeue path.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::domain::NormalizedVoteRecord;
use crate::ports::{Clock, StoreError, SystemClock, VoteStore};

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVote {
    pub id: u64,
    pub vote: String,
    pub voter_id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Table {
    rows: Vec<StoredVote>,
    next_id: u64,
}

#[derive(Clone)]
pub struct InMemoryVoteStore {
    table: Arc<Mutex<Table>>,
    unavailable: Arc<AtomicBool>,
    fail_next: Arc<AtomicU32>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryVoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVoteStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// `created_at` comes from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            unavailable: Arc::new(AtomicBool::new(false)),
            fail_next: Arc::new(AtomicU32::new(0)),
            clock,
        }
    }

    /// Simulate the database going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make the next `n` inserts fail while pings keep succeeding
    /// (deadlock, lock wait timeout, ...).
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<StoredVote> {
        self.lock().map(|t| t.rows.clone()).unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store offline".to_string(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::OperationFailed("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl VoteStore for InMemoryVoteStore {
    async fn insert(&self, record: &NormalizedVoteRecord) -> Result<(), StoreError> {
        self.check_available()?;

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::OperationFailed(
                "injected insert failure".to_string(),
            ));
        }

        let created_at = self.clock.now();
        let mut table = self.lock()?;
        table.next_id += 1;
        let id = table.next_id;
        table.rows.push(StoredVote {
            id,
            vote: record.choice.clone(),
            voter_id: record.voter_id.clone(),
            timestamp: record.timestamp,
            created_at,
        });
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(self.lock()?.rows.len() as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VoteEvent;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn record(choice: &str) -> NormalizedVoteRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        NormalizedVoteRecord::new(VoteEvent::new(choice, "v1", "raw"), ts.fixed_offset())
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let store = InMemoryVoteStore::new();
        store.insert(&record("cats")).await.unwrap();
        store.insert(&record("cats")).await.unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].id < rows[1].id);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn created_at_uses_clock() {
        let at = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let store = InMemoryVoteStore::with_clock(Arc::new(FixedClock::new(at)));
        store.insert(&record("dogs")).await.unwrap();
        assert_eq!(store.rows()[0].created_at, at);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryVoteStore::new();
        store.fail_next_inserts(2);

        assert!(store.insert(&record("a")).await.is_err());
        assert!(store.insert(&record("a")).await.is_err());
        store.insert(&record("a")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn unavailable_store_rejects_everything() {
        let store = InMemoryVoteStore::new();
        store.set_available(false);
        assert!(matches!(
            store.insert(&record("a")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.count().await.is_err());
        assert!(store.ping().await.is_err());
    }
}
