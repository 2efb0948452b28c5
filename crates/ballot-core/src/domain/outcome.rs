//! Outcome of one processing iteration.
//!
//! Produced and consumed within a single loop iteration. Never persisted,
//! only folded into counters.

use serde::{Deserialize, Serialize};

/// Which stage of an iteration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The queue could not be read. Nothing was removed.
    Dequeue,
    /// The payload was malformed and dropped. Never requeued.
    Decode,
    /// The store rejected the insert. The payload was requeued (or dead-lettered).
    Persist,
}

/// Tri-state result of [`crate::app::VoteProcessor::process_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "stage")]
pub enum ProcessingOutcome {
    /// Nothing arrived within the poll interval.
    Empty,
    /// The vote is durably stored.
    Persisted,
    Failed(FailureStage),
}

impl ProcessingOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, ProcessingOutcome::Persisted)
    }
}
