//! WorkerBuilder - ループの構築とワイヤリング
//!
//! - Builder パターン
//! - 起動時検証（Fail-fast）: 足りない port や不正な設定は build() で弾く

use std::sync::Arc;
use std::time::Duration;

use super::processor::{ProcessorSettings, VoteProcessor};
use super::worker_loop::{LoopSettings, WorkerLoop};
use crate::observability::WorkerMetrics;
use crate::ports::{Clock, SystemClock, VoteQueue, VoteStore};

/// All loop tunables in one place. Defaults match the production worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_key: String,
    pub poll_interval: Duration,
    pub queue_error_backoff: Duration,
    pub persist_retry_delay: Duration,
    pub max_persist_attempts: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let processor = ProcessorSettings::default();
        let pauses = LoopSettings::default();
        Self {
            queue_key: processor.queue_key,
            poll_interval: processor.poll_interval,
            queue_error_backoff: pauses.queue_error_backoff,
            persist_retry_delay: pauses.persist_retry_delay,
            max_persist_attempts: processor.max_persist_attempts,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing {0}; it must be set before build()")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Assembles a [`WorkerLoop`].
///
/// ```ignore
/// let worker = WorkerBuilder::new()
///     .queue(Arc::new(redis_queue))
///     .store(Arc::new(mysql_store))
///     .metrics(Arc::clone(&metrics))
///     .config(config)
///     .build()?;
/// ```
pub struct WorkerBuilder {
    queue: Option<Arc<dyn VoteQueue>>,
    store: Option<Arc<dyn VoteStore>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<WorkerMetrics>>,
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            queue: None,
            store: None,
            clock: Arc::new(SystemClock),
            metrics: None,
            config: WorkerConfig::default(),
        }
    }

    pub fn queue(mut self, queue: Arc<dyn VoteQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(mut self, store: Arc<dyn VoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share counters with the HTTP reporter. A private set is created otherwise.
    pub fn metrics(mut self, metrics: Arc<WorkerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<WorkerLoop, BuildError> {
        let queue = self.queue.ok_or(BuildError::Missing("queue"))?;
        let store = self.store.ok_or(BuildError::Missing("store"))?;
        validate(&self.config)?;

        let config = self.config;
        let processor = VoteProcessor::new(
            queue,
            store,
            self.clock,
            self.metrics.unwrap_or_default(),
            ProcessorSettings {
                queue_key: config.queue_key,
                poll_interval: config.poll_interval,
                max_persist_attempts: config.max_persist_attempts,
            },
        );
        Ok(WorkerLoop::new(
            processor,
            LoopSettings {
                queue_error_backoff: config.queue_error_backoff,
                persist_retry_delay: config.persist_retry_delay,
            },
        ))
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &WorkerConfig) -> Result<(), BuildError> {
    if config.queue_key.trim().is_empty() {
        return Err(BuildError::InvalidSetting {
            name: "queue_key",
            reason: "must not be empty".to_string(),
        });
    }
    // 0 だと BRPOP が無期限ブロックになり cancel を観測できない
    if config.poll_interval.is_zero() {
        return Err(BuildError::InvalidSetting {
            name: "poll_interval",
            reason: "must be greater than zero".to_string(),
        });
    }
    if config.max_persist_attempts == Some(0) {
        return Err(BuildError::InvalidSetting {
            name: "max_persist_attempts",
            reason: "must be at least 1 when set".to_string(),
        });
    }
    Ok(())
}
