//! Domain model (vote payloads, timestamp normalization, outcomes).

pub mod outcome;
pub mod timestamp;
pub mod vote;

pub use self::outcome::{FailureStage, ProcessingOutcome};
pub use self::timestamp::{
    ParsedTimestamp, TimestampFormat, UnparseableTimestamp, normalize_timestamp,
};
pub use self::vote::{
    DecodeError, MAX_CHOICE_LEN, MAX_VOTER_ID_LEN, NormalizedVoteRecord, VoteEvent, decode_vote,
};
