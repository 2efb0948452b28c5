//! VoteQueue port - 配送キュー（Redis または InMemory）
//!
//! An external blocking FIFO keyed by name. Producers `push` at the tail,
//! the single consumer `pop`s from the head. `requeue` puts a payload back at
//! the head so it is the next one popped.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Connection refused, dropped, pool exhausted, ...
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

/// Payloads are UTF-8 strings (JSON on the wire).
///
/// # 設計原則
/// - blocking pop（timeout 付き）. Never waits longer than `timeout`, so the
///   caller can observe cancellation between polls.
/// - A failed `pop` must not remove anything.
#[async_trait]
pub trait VoteQueue: Send + Sync {
    /// Enqueue at the tail.
    async fn push(&self, key: &str, payload: &str) -> Result<(), QueueError>;

    /// Re-insert at the retrieval end (retry after a downstream failure).
    async fn requeue(&self, key: &str, payload: &str) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the oldest payload. `Ok(None)` on timeout.
    async fn pop(&self, key: &str, timeout: Duration) -> Result<Option<String>, QueueError>;

    async fn len(&self, key: &str) -> Result<u64, QueueError>;

    /// Drop every payload under `key` (load-test setup).
    async fn clear(&self, key: &str) -> Result<(), QueueError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), QueueError>;
}
