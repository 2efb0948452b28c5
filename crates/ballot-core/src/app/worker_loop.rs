//! WorkerLoop - 投票処理ループ
//!
//! Single consumer: exactly one task drains the queue, so two iterations can
//! never hold the same vote. Concurrency safety comes from not parallelizing
//! consumption.
//!
//! # 状態遷移
//! `Running` → (cancel) → `Draining` → (in-flight iteration done) → `Stopped`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::processor::VoteProcessor;
use crate::domain::{FailureStage, ProcessingOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    /// Cancellation observed; finishing the current iteration.
    Draining,
    Stopped,
}

/// Pauses between iterations.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Wait after a failed dequeue before trying again.
    pub queue_error_backoff: Duration,

    /// Wait after a failed insert (payload already requeued). Keeps a dead
    /// store from turning the loop into a busy spin.
    pub persist_retry_delay: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            queue_error_backoff: Duration::from_secs(5),
            persist_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Per-outcome tallies for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub iterations: u64,
    pub empty: u64,
    pub persisted: u64,
    pub dequeue_failures: u64,
    pub decode_failures: u64,
    pub persist_failures: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: ProcessingOutcome) {
        self.iterations += 1;
        match outcome {
            ProcessingOutcome::Empty => self.empty += 1,
            ProcessingOutcome::Persisted => self.persisted += 1,
            ProcessingOutcome::Failed(FailureStage::Dequeue) => self.dequeue_failures += 1,
            ProcessingOutcome::Failed(FailureStage::Decode) => self.decode_failures += 1,
            ProcessingOutcome::Failed(FailureStage::Persist) => self.persist_failures += 1,
        }
    }
}

pub struct WorkerLoop {
    processor: VoteProcessor,
    settings: LoopSettings,
}

impl WorkerLoop {
    pub fn new(processor: VoteProcessor, settings: LoopSettings) -> Self {
        Self {
            processor,
            settings,
        }
    }

    /// Spawn the loop on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> WorkerHandle {
        let (state_tx, state_rx) = watch::channel(WorkerState::Running);
        let join = tokio::spawn(self.run(cancel.clone(), state_tx));
        WorkerHandle {
            cancel,
            state: state_rx,
            join,
        }
    }

    /// Run until `cancel` fires. The in-flight iteration is always allowed to
    /// finish; only the pauses between iterations are cut short.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        state: watch::Sender<WorkerState>,
    ) -> LoopStats {
        info!(
            queue = %self.processor.settings().queue_key,
            "Starting vote processing"
        );
        let mut stats = LoopStats::default();
        let mut draining = false;

        while !cancel.is_cancelled() {
            let iteration = self.processor.process_next();
            tokio::pin!(iteration);

            // pop は poll interval で必ず戻るので、ここで待っても drain は有界
            let outcome = loop {
                tokio::select! {
                    outcome = &mut iteration => break outcome,
                    _ = cancel.cancelled(), if !draining => {
                        draining = true;
                        state.send_replace(WorkerState::Draining);
                        info!("Shutdown requested; finishing in-flight vote");
                    }
                }
            };
            stats.record(outcome);

            let pause = match outcome {
                ProcessingOutcome::Failed(FailureStage::Dequeue) => {
                    self.settings.queue_error_backoff
                }
                ProcessingOutcome::Failed(FailureStage::Persist) => {
                    self.settings.persist_retry_delay
                }
                _ => Duration::ZERO,
            };
            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        if !draining {
            state.send_replace(WorkerState::Draining);
        }
        state.send_replace(WorkerState::Stopped);
        info!(
            iterations = stats.iterations,
            persisted = stats.persisted,
            "Stopping vote processing"
        );
        stats
    }
}

/// Handle to a spawned [`WorkerLoop`].
pub struct WorkerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<WorkerState>,
    join: JoinHandle<LoopStats>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait up to `grace` for the loop to stop. If it does not,
    /// the in-flight iteration is abandoned (the task is aborted).
    pub async fn shutdown(self, grace: Duration) -> Option<LoopStats> {
        self.cancel.cancel();
        let mut join = self.join;
        match tokio::time::timeout(grace, &mut join).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                error!(error = %e, "Worker task failed");
                None
            }
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs_f64(),
                    "Worker did not drain within grace period; abandoning in-flight vote"
                );
                join.abort();
                None
            }
        }
    }
}
