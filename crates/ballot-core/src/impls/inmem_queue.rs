//! InMemoryVoteQueue - 開発用・テスト用の配送キュー
//!
//! - Mutex + Condvar による blocking pop
//! - blocking 部分は spawn_blocking に逃がす
//! - key ごとに VecDeque を持つ
//! - `set_available(false)` で Redis 障害を再現できる

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::ports::{QueueError, VoteQueue};

type Queues = HashMap<String, VecDeque<String>>;

/// In-process stand-in for the Redis list.
///
/// Head = front of the `VecDeque` (next to be popped), tail = back.
#[derive(Clone, Default)]
pub struct InMemoryVoteQueue {
    queues: Arc<Mutex<Queues>>,
    condvar: Arc<Condvar>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryVoteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Snapshot of `key`, head first.
    pub fn snapshot(&self, key: &str) -> Vec<String> {
        match self.queues.lock() {
            Ok(queues) => queues
                .get(key)
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory queue offline".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Queues>, QueueError> {
        self.queues
            .lock()
            .map_err(|_| QueueError::OperationFailed("queue lock poisoned".to_string()))
    }
}

#[async_trait]
impl VoteQueue for InMemoryVoteQueue {
    async fn push(&self, key: &str, payload: &str) -> Result<(), QueueError> {
        self.check_available()?;
        self.lock()?
            .entry(key.to_string())
            .or_default()
            .push_back(payload.to_string());
        // key が違う waiter もいるので全員起こす
        self.condvar.notify_all();
        Ok(())
    }

    async fn requeue(&self, key: &str, payload: &str) -> Result<(), QueueError> {
        self.check_available()?;
        self.lock()?
            .entry(key.to_string())
            .or_default()
            .push_front(payload.to_string());
        self.condvar.notify_all();
        Ok(())
    }

    async fn pop(&self, key: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        self.check_available()?;

        let queues = self.queues.clone();
        let condvar = self.condvar.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let poisoned = || QueueError::OperationFailed("queue lock poisoned".to_string());
            let start = Instant::now();
            let mut guard = queues.lock().map_err(|_| poisoned())?;
            loop {
                if let Some(queue) = guard.get_mut(&key)
                    && let Some(payload) = queue.pop_front()
                {
                    return Ok(Some(payload));
                }
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Ok(None);
                }
                let (next, _) = condvar
                    .wait_timeout(guard, timeout - elapsed)
                    .map_err(|_| poisoned())?;
                guard = next;
            }
        })
        .await
        .map_err(|e| QueueError::OperationFailed(format!("pop failed: {e}")))?
    }

    async fn len(&self, key: &str) -> Result<u64, QueueError> {
        self.check_available()?;
        Ok(self.lock()?.get(key).map(|q| q.len() as u64).unwrap_or(0))
    }

    async fn clear(&self, key: &str) -> Result<(), QueueError> {
        self.check_available()?;
        self.lock()?.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check_available()
    }
}
