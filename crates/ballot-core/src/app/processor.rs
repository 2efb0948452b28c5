//! VoteProcessor - 1 イテレーション分の処理
//!
//! # フロー
//! 1. VoteQueue::pop() で payload 取得（poll interval で打ち切り）
//! 2. decode_vote() で VoteEvent に変換。失敗したら破棄（requeue しない）
//! 3. normalize_timestamp()。失敗したら現在時刻で代用
//! 4. VoteStore::insert()。失敗したら元の payload を queue の先頭に戻す
//!
//! Decode failures and store rejections are permanent, other insert failures
//! are transient. Only the latter are retried; a payload that can never be
//! stored must not sit at the head of the queue forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::domain::{
    FailureStage, NormalizedVoteRecord, ProcessingOutcome, VoteEvent, decode_vote,
    normalize_timestamp,
};
use crate::observability::WorkerMetrics;
use crate::ports::{Clock, StoreError, VoteQueue, VoteStore};

/// Characters of an undecodable payload kept in the log line.
const LOGGED_PAYLOAD_CHARS: usize = 128;

/// Knobs for a single iteration.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Queue key (Redis list name).
    pub queue_key: String,

    /// Upper bound on one blocking pop.
    pub poll_interval: Duration,

    /// `None`: retry forever. `Some(n)`: after `n` failed inserts the payload
    /// goes to [`ProcessorSettings::dead_letter_key`] instead of back on the queue.
    pub max_persist_attempts: Option<u32>,
}

impl ProcessorSettings {
    pub fn dead_letter_key(&self) -> String {
        format!("{}:dead", self.queue_key)
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            queue_key: "votes".to_string(),
            poll_interval: Duration::from_secs(1),
            max_persist_attempts: None,
        }
    }
}

/// Owns everything one iteration touches.
///
/// Exclusively owned by the worker loop, so `&mut self` is the only access
/// path and the per-payload attempt counts need no locking.
pub struct VoteProcessor {
    queue: Arc<dyn VoteQueue>,
    store: Arc<dyn VoteStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<WorkerMetrics>,
    settings: ProcessorSettings,
    attempts: HashMap<String, u32>,
}

impl VoteProcessor {
    pub fn new(
        queue: Arc<dyn VoteQueue>,
        store: Arc<dyn VoteStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<WorkerMetrics>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            queue,
            store,
            clock,
            metrics,
            settings,
            attempts: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    /// Run one dequeue → decode → normalize → persist iteration.
    pub async fn process_next(&mut self) -> ProcessingOutcome {
        let popped = self
            .queue
            .pop(&self.settings.queue_key, self.settings.poll_interval)
            .await;

        let payload = match popped {
            Ok(Some(payload)) => payload,
            Ok(None) => return ProcessingOutcome::Empty,
            Err(e) => {
                self.metrics.inc_redis_error();
                error!(error = %e, "Failed to pop from queue");
                return ProcessingOutcome::Failed(FailureStage::Dequeue);
            }
        };

        self.process_payload(payload).await
    }

    /// Everything after the dequeue. `payload` is owned by this iteration.
    pub async fn process_payload(&mut self, payload: String) -> ProcessingOutcome {
        let started = Instant::now();

        let event = match decode_vote(payload.as_bytes()) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.inc_decode_error();
                error!(
                    error = %e,
                    payload_len = payload.len(),
                    payload = %preview(&payload),
                    "Failed to decode vote payload; dropping"
                );
                return ProcessingOutcome::Failed(FailureStage::Decode);
            }
        };

        let record = self.normalize(event);

        let outcome = match self.store.insert(&record).await {
            Ok(()) => {
                if self.settings.max_persist_attempts.is_some() {
                    self.attempts.remove(&payload);
                }
                self.metrics.inc_processed(&record.choice);
                info!(
                    vote = %record.choice,
                    voter_id = %record.voter_id,
                    timestamp = %record.timestamp.to_rfc3339(),
                    "Vote processed successfully"
                );
                ProcessingOutcome::Persisted
            }
            Err(e) => {
                self.metrics.inc_database_error();
                error!(
                    error = %e,
                    vote = %record.choice,
                    voter_id = %record.voter_id,
                    "Failed to insert vote into database"
                );
                if matches!(e, StoreError::Rejected(_)) {
                    self.attempts.remove(&payload);
                    self.dead_letter(payload, "rejected by store").await;
                } else {
                    self.retry_later(payload).await;
                }
                ProcessingOutcome::Failed(FailureStage::Persist)
            }
        };

        self.metrics
            .observe_process_secs(started.elapsed().as_secs_f64());
        outcome
    }

    /// Resolve the timestamp; fall back to the clock instead of failing.
    fn normalize(&self, event: VoteEvent) -> NormalizedVoteRecord {
        match normalize_timestamp(&event.raw_timestamp) {
            Ok(parsed) => {
                debug!(format = ?parsed.format, "Parsed vote timestamp");
                NormalizedVoteRecord::new(event, parsed.value)
            }
            Err(e) => {
                self.metrics.inc_timestamp_fallback();
                warn!(
                    error = %e,
                    voter_id = %event.voter_id,
                    "Failed to parse timestamp; using current time"
                );
                NormalizedVoteRecord::with_fallback(event, self.clock.now())
            }
        }
    }

    /// Put the raw payload back for a future iteration (or dead-letter it).
    async fn retry_later(&mut self, payload: String) {
        if let Some(max) = self.settings.max_persist_attempts {
            let attempts = self.attempts.entry(payload.clone()).or_insert(0);
            *attempts += 1;
            if *attempts >= max {
                self.attempts.remove(&payload);
                self.dead_letter(payload, &format!("exceeded {max} insert attempts"))
                    .await;
                return;
            }
        }

        match self
            .queue
            .requeue(&self.settings.queue_key, &payload)
            .await
        {
            Ok(()) => {
                self.metrics.inc_requeued();
                debug!("Vote requeued for retry");
            }
            Err(e) => {
                self.attempts.remove(&payload);
                self.metrics.inc_redis_error();
                error!(error = %e, payload = %payload, "Failed to requeue vote; vote lost");
            }
        }
    }

    async fn dead_letter(&self, payload: String, reason: &str) {
        let key = self.settings.dead_letter_key();
        match self.queue.push(&key, &payload).await {
            Ok(()) => {
                self.metrics.inc_dead_lettered();
                warn!(
                    reason,
                    dead_letter_key = %key,
                    "Vote moved to dead-letter list"
                );
            }
            Err(e) => {
                self.metrics.inc_redis_error();
                error!(error = %e, payload = %payload, "Failed to dead-letter vote; vote lost");
            }
        }
    }
}

fn preview(payload: &str) -> String {
    match payload.char_indices().nth(LOGGED_PAYLOAD_CHARS) {
        Some((cut, _)) => format!("{}...", &payload[..cut]),
        None => payload.to_string(),
    }
}
