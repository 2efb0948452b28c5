//! Vote payloads and the records derived from them.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The unit of work carried on the queue.
///
/// Wire shape: `{"vote": "...", "voter_id": "...", "timestamp": "..."}`.
/// All three fields are required strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvent {
    #[serde(rename = "vote")]
    pub choice: String,

    pub voter_id: String,

    #[serde(rename = "timestamp")]
    pub raw_timestamp: String,
}

impl VoteEvent {
    pub fn new(
        choice: impl Into<String>,
        voter_id: impl Into<String>,
        raw_timestamp: impl Into<String>,
    ) -> Self {
        Self {
            choice: choice.into(),
            voter_id: voter_id.into(),
            raw_timestamp: raw_timestamp.into(),
        }
    }

    /// Serialize back into the queue wire format.
    pub fn to_payload(&self) -> String {
        // String フィールドのみなので失敗しない
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Payload could not be turned into a [`VoteEvent`].
///
/// Never retriable: the same bytes will fail the same way next time.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed vote payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("vote payload field `{0}` is empty")]
    EmptyField(&'static str),

    /// Longer than the `votes` column holding it; the store would refuse it forever.
    #[error("vote payload field `{field}` exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Width of the `votes.vote` column, in characters.
pub const MAX_CHOICE_LEN: usize = 64;

/// Width of the `votes.voter_id` column, in characters.
pub const MAX_VOTER_ID_LEN: usize = 255;

/// Decode a raw queue payload.
///
/// Any non-empty `vote` is accepted, whitespace included, as long as it fits
/// its column.
pub fn decode_vote(payload: &[u8]) -> Result<VoteEvent, DecodeError> {
    let event: VoteEvent = serde_json::from_slice(payload)?;
    if event.choice.is_empty() {
        return Err(DecodeError::EmptyField("vote"));
    }
    check_len("vote", &event.choice, MAX_CHOICE_LEN)?;
    check_len("voter_id", &event.voter_id, MAX_VOTER_ID_LEN)?;
    Ok(event)
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), DecodeError> {
    if value.chars().count() > max {
        return Err(DecodeError::TooLong { field, max });
    }
    Ok(())
}

/// A vote with its timestamp resolved. Consumed once by a [`crate::ports::VoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedVoteRecord {
    pub choice: String,
    pub voter_id: String,
    /// Zone as supplied, or UTC when the source carried none (or fell back to now).
    pub timestamp: DateTime<FixedOffset>,
    /// `true` when the producer's timestamp was unusable and `timestamp` is the wall clock.
    pub timestamp_fallback: bool,
}

impl NormalizedVoteRecord {
    pub fn new(event: VoteEvent, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            choice: event.choice,
            voter_id: event.voter_id,
            timestamp,
            timestamp_fallback: false,
        }
    }

    pub fn with_fallback(event: VoteEvent, now: DateTime<Utc>) -> Self {
        Self {
            choice: event.choice,
            voter_id: event.voter_id,
            timestamp: now.fixed_offset(),
            timestamp_fallback: true,
        }
    }

    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        self.timestamp.with_timezone(&Utc)
    }
}
