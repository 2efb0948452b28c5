//! VoteStore port - 投票の永続化先（MySQL または InMemory）
//!
//! One row per insert. Redelivered votes produce duplicate rows; nothing here
//! deduplicates (at-least-once).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::NormalizedVoteRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused this particular row (constraint, value too long, ...).
    #[error("store rejected vote: {0}")]
    Rejected(String),

    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Durably record one vote. A single-row write; no transaction needed.
    async fn insert(&self, record: &NormalizedVoteRecord) -> Result<(), StoreError>;

    /// Total rows. Used by harnesses and monitoring, never by the loop.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}
