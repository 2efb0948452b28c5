//! LoadGenerator - 負荷試験用のトラフィック生成
//!
//! Not on the serving path. Pushes synthetic votes from several producer
//! tasks while a monitor samples queue depth, then reports how many rows the
//! consumer managed to insert.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::domain::VoteEvent;
use crate::ports::{Clock, QueueError, StoreError, VoteQueue, VoteStore};

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub queue_key: String,
    /// Stop after this many votes in total. `None`: run for `duration`.
    pub votes: Option<u64>,
    /// Concurrent producer tasks.
    pub workers: usize,
    pub duration: Duration,
    /// Upper bound of the random pause between two pushes of one producer.
    pub max_pause: Duration,
    /// How long to wait for the consumer to drain after producers stop.
    pub settle: Duration,
    pub monitor_interval: Duration,
    pub choices: Vec<String>,
    /// Delete the queue before starting.
    pub clear_queue: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            queue_key: "votes".to_string(),
            votes: Some(1000),
            workers: 10,
            duration: Duration::from_secs(120),
            max_pause: Duration::from_millis(100),
            settle: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(1),
            choices: vec!["cats".to_string(), "dogs".to_string()],
            clear_queue: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid load config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub generated: u64,
    pub errors: u64,
    /// Row count delta. `None` when no store was attached.
    pub inserted: Option<u64>,
    pub peak_depth: u64,
    pub final_depth: u64,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn generation_rate(&self) -> f64 {
        per_sec(self.generated, self.elapsed)
    }

    pub fn processing_rate(&self) -> Option<f64> {
        self.inserted.map(|n| per_sec(n, self.elapsed))
    }

    /// Inserted / generated, in percent.
    pub fn efficiency(&self) -> Option<f64> {
        match (self.inserted, self.generated) {
            (Some(_), 0) | (None, _) => None,
            (Some(n), g) => Some(n as f64 / g as f64 * 100.0),
        }
    }
}

fn per_sec(n: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { n as f64 / secs } else { 0.0 }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Load Test Results")?;
        writeln!(f, "=================")?;
        writeln!(f, "Test Duration: {:.2?}", self.elapsed)?;
        writeln!(f, "Votes Generated: {}", self.generated)?;
        match self.inserted {
            Some(n) => writeln!(f, "Database Inserts: {n}")?,
            None => writeln!(f, "Database Inserts: n/a")?,
        }
        writeln!(f, "Peak Queue Depth: {}", self.peak_depth)?;
        writeln!(f, "Final Queue Depth: {}", self.final_depth)?;
        writeln!(f, "Errors: {}", self.errors)?;
        writeln!(f)?;
        writeln!(f, "Vote Generation Rate: {:.2} votes/sec", self.generation_rate())?;
        if let Some(rate) = self.processing_rate() {
            writeln!(f, "Processing Rate: {rate:.2} votes/sec")?;
        }
        if let Some(pct) = self.efficiency() {
            writeln!(f, "Processing Efficiency: {pct:.2}%")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    generated: AtomicU64,
    reserved: AtomicU64,
    errors: AtomicU64,
    peak_depth: AtomicU64,
}

pub struct LoadGenerator {
    queue: Arc<dyn VoteQueue>,
    store: Option<Arc<dyn VoteStore>>,
    clock: Arc<dyn Clock>,
    config: LoadConfig,
}

impl LoadGenerator {
    pub fn new(queue: Arc<dyn VoteQueue>, clock: Arc<dyn Clock>, config: LoadConfig) -> Self {
        Self {
            queue,
            store: None,
            clock,
            config,
        }
    }

    /// Measure inserts through the store's row count.
    pub fn with_store(mut self, store: Arc<dyn VoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<LoadReport, LoadError> {
        if self.config.workers == 0 {
            return Err(LoadError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.config.choices.is_empty() {
            return Err(LoadError::InvalidConfig("choices must not be empty".into()));
        }

        if self.config.clear_queue {
            self.queue.clear(&self.config.queue_key).await?;
        }
        let initial_count = match &self.store {
            Some(store) => Some(store.count().await?),
            None => None,
        };

        let started = Instant::now();
        let counters = Arc::new(Counters::default());
        // producers と monitor は別 token（cancel で両方止まる）
        let producers_done = cancel.child_token();
        let monitor_done = cancel.child_token();

        info!(
            workers = self.config.workers,
            votes = ?self.config.votes,
            duration_secs = self.config.duration.as_secs_f64(),
            "Starting load test"
        );

        let monitor = tokio::spawn(monitor(
            Arc::clone(&self.queue),
            self.config.queue_key.clone(),
            self.config.monitor_interval,
            Arc::clone(&counters),
            monitor_done.clone(),
        ));

        let mut producers = JoinSet::new();
        for worker_id in 0..self.config.workers {
            producers.spawn(produce(
                worker_id,
                Arc::clone(&self.queue),
                Arc::clone(&self.clock),
                self.config.clone(),
                Arc::clone(&counters),
                producers_done.clone(),
            ));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.config.duration) => {}
            _ = async { while producers.join_next().await.is_some() {} } => {}
            _ = cancel.cancelled() => {}
        }
        producers_done.cancel();
        while producers.join_next().await.is_some() {}

        info!("Waiting for worker to process remaining votes");
        self.settle(initial_count, counters.generated.load(Ordering::Relaxed))
            .await;

        monitor_done.cancel();
        if let Err(e) = monitor.await {
            warn!(error = %e, "Queue depth monitor failed; peak depth may be understated");
        }

        let final_depth = self.queue.len(&self.config.queue_key).await?;
        let inserted = match (&self.store, initial_count) {
            (Some(store), Some(initial)) => Some(store.count().await?.saturating_sub(initial)),
            _ => None,
        };

        Ok(LoadReport {
            generated: counters.generated.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            inserted,
            peak_depth: counters.peak_depth.load(Ordering::Relaxed).max(final_depth),
            final_depth,
            elapsed: started.elapsed(),
        })
    }

    /// Wait until the queue is empty and, with a store attached, every
    /// generated vote has a row. Gives up after `settle`.
    async fn settle(&self, initial_count: Option<u64>, generated: u64) {
        let deadline = tokio::time::Instant::now() + self.config.settle;
        while tokio::time::Instant::now() < deadline {
            match self.queue.len(&self.config.queue_key).await {
                Ok(0) => {
                    let caught_up = match (&self.store, initial_count) {
                        (Some(store), Some(initial)) => store
                            .count()
                            .await
                            .is_ok_and(|n| n.saturating_sub(initial) >= generated),
                        _ => true,
                    };
                    if caught_up {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read queue depth while settling"),
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

async fn produce(
    worker_id: usize,
    queue: Arc<dyn VoteQueue>,
    clock: Arc<dyn Clock>,
    config: LoadConfig,
    counters: Arc<Counters>,
    done: CancellationToken,
) {
    let max_pause_ms = config.max_pause.as_millis() as u64;

    while !done.is_cancelled() {
        if let Some(limit) = config.votes {
            let reserved = counters
                .reserved
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < limit).then_some(n + 1)
                });
            if reserved.is_err() {
                break;
            }
        }

        // thread_rng は Send ではないので await をまたがない
        let (choice, pause_ms) = {
            let mut rng = rand::thread_rng();
            let choice = config
                .choices
                .choose(&mut rng)
                .cloned()
                .unwrap_or_default();
            let pause_ms = if max_pause_ms > 0 {
                rng.gen_range(0..max_pause_ms)
            } else {
                0
            };
            (choice, pause_ms)
        };

        let event = VoteEvent::new(
            choice,
            format!("load-{worker_id}-{}", Ulid::new()),
            clock.now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        );

        match queue.push(&config.queue_key, &event.to_payload()).await {
            Ok(()) => {
                counters.generated.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, error = %e, "Failed to push vote");
            }
        }

        if pause_ms > 0 {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(pause_ms)) => {}
            }
        }
    }
}

async fn monitor(
    queue: Arc<dyn VoteQueue>,
    key: String,
    period: Duration,
    counters: Arc<Counters>,
    done: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tick.tick() => {
                match queue.len(&key).await {
                    Ok(depth) => {
                        counters.peak_depth.fetch_max(depth, Ordering::Relaxed);
                        info!(
                            generated = counters.generated.load(Ordering::Relaxed),
                            queue_depth = depth,
                            "Load progress"
                        );
                    }
                    Err(e) => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Failed to read queue depth");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::{WorkerBuilder, WorkerConfig};
    use crate::domain::decode_vote;
    use crate::impls::{InMemoryVoteQueue, InMemoryVoteStore};
    use crate::ports::SystemClock;

    fn quick(votes: u64) -> LoadConfig {
        LoadConfig {
            votes: Some(votes),
            workers: 4,
            duration: Duration::from_secs(10),
            max_pause: Duration::ZERO,
            settle: Duration::from_secs(5),
            monitor_interval: Duration::from_millis(20),
            ..LoadConfig::default()
        }
    }

    #[tokio::test]
    async fn generates_decodable_votes_up_to_the_limit() {
        let queue = InMemoryVoteQueue::new();
        let generator = LoadGenerator::new(
            Arc::new(queue.clone()),
            Arc::new(SystemClock),
            LoadConfig {
                settle: Duration::ZERO,
                ..quick(30)
            },
        );

        let report = generator.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.generated, 30);
        assert_eq!(report.errors, 0);
        assert_eq!(report.inserted, None);
        assert_eq!(report.final_depth, 30);

        for payload in queue.snapshot("votes") {
            let event = decode_vote(payload.as_bytes()).unwrap();
            assert!(event.choice == "cats" || event.choice == "dogs");
            assert!(event.voter_id.starts_with("load-"));
            // zoneless microseconds → NaiveFractional
            assert!(crate::domain::normalize_timestamp(&event.raw_timestamp).is_ok());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn consumer_inserts_everything_generated() {
        let queue = InMemoryVoteQueue::new();
        let store = InMemoryVoteStore::new();
        let worker = WorkerBuilder::new()
            .queue(Arc::new(queue.clone()))
            .store(Arc::new(store.clone()))
            .config(WorkerConfig {
                poll_interval: Duration::from_millis(20),
                ..WorkerConfig::default()
            })
            .build()
            .unwrap()
            .spawn(CancellationToken::new());

        let report = LoadGenerator::new(Arc::new(queue.clone()), Arc::new(SystemClock), quick(200))
            .with_store(Arc::new(store.clone()))
            .run(CancellationToken::new())
            .await
            .unwrap();

        worker.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(report.generated, 200);
        assert_eq!(report.inserted, Some(200));
        assert_eq!(report.final_depth, 0);
        assert_eq!(report.efficiency(), Some(100.0));
    }

    #[tokio::test]
    async fn unavailable_queue_fails_the_run() {
        let queue = InMemoryVoteQueue::new();
        let generator = LoadGenerator::new(
            Arc::new(queue.clone()),
            Arc::new(SystemClock),
            LoadConfig {
                clear_queue: false,
                settle: Duration::ZERO,
                ..quick(10)
            },
        );
        queue.set_available(false);

        // len() at the end fails too
        assert!(matches!(
            generator.run(CancellationToken::new()).await,
            Err(LoadError::Queue(_))
        ));
    }

    /// Panics on the first depth sample, which the monitor takes.
    struct FirstLenPanics {
        inner: InMemoryVoteQueue,
        sampled: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl VoteQueue for FirstLenPanics {
        async fn push(&self, key: &str, payload: &str) -> Result<(), QueueError> {
            self.inner.push(key, payload).await
        }
        async fn requeue(&self, key: &str, payload: &str) -> Result<(), QueueError> {
            self.inner.requeue(key, payload).await
        }
        async fn pop(&self, key: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
            self.inner.pop(key, timeout).await
        }
        async fn len(&self, key: &str) -> Result<u64, QueueError> {
            if !self.sampled.swap(true, Ordering::SeqCst) {
                panic!("depth sample failed");
            }
            self.inner.len(key).await
        }
        async fn clear(&self, key: &str) -> Result<(), QueueError> {
            self.inner.clear(key).await
        }
        async fn ping(&self) -> Result<(), QueueError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn monitor_failure_does_not_fail_the_run() {
        let queue = Arc::new(FirstLenPanics {
            inner: InMemoryVoteQueue::new(),
            sampled: Default::default(),
        });
        let generator = LoadGenerator::new(
            queue,
            Arc::new(SystemClock),
            LoadConfig {
                settle: Duration::ZERO,
                ..quick(20)
            },
        );

        let report = generator.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.generated, 20);
        assert_eq!(report.final_depth, 20);
        assert_eq!(report.peak_depth, 20);
    }

    #[tokio::test]
    async fn rejects_zero_workers() {
        let generator = LoadGenerator::new(
            Arc::new(InMemoryVoteQueue::new()),
            Arc::new(SystemClock),
            LoadConfig {
                workers: 0,
                ..LoadConfig::default()
            },
        );
        assert!(matches!(
            generator.run(CancellationToken::new()).await,
            Err(LoadError::InvalidConfig(_))
        ));
    }

    #[test]
    fn report_rates() {
        let report = LoadReport {
            generated: 100,
            errors: 0,
            inserted: Some(50),
            peak_depth: 10,
            final_depth: 0,
            elapsed: Duration::from_secs(10),
        };
        assert_eq!(report.generation_rate(), 10.0);
        assert_eq!(report.processing_rate(), Some(5.0));
        assert_eq!(report.efficiency(), Some(50.0));
        assert!(report.to_string().contains("Processing Efficiency: 50.00%"));
    }
}
