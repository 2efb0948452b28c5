//! Timestamp normalization.
//!
//! Producers send timestamps as free-form strings. We try a fixed, ordered
//! list of formats and keep the first one that parses.
//!
//! # 順序（優先度順）
//! 1. RFC 3339 with fractional seconds (`2024-01-01T10:00:00.5+09:00`)
//! 2. RFC 3339 without fraction (`2024-01-01T10:00:00Z`)
//! 3. zoneless, fractional (`2024-01-01T10:00:00.123456`, Python `isoformat()`)
//! 4. zoneless, no fraction (`2024-01-01T10:00:00`)
//! 5. space separated, optional fraction (`2024-01-01 10:00:00`, Python `str(datetime)`)
//!
//! Zoneless formats are interpreted as UTC. Zoned formats keep their offset.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use thiserror::Error;

/// One accepted textual format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampFormat {
    Rfc3339Fractional,
    Rfc3339,
    NaiveFractional,
    Naive,
    SpaceSeparated,
}

impl TimestampFormat {
    /// Precedence order. Tried front to back; do not reorder.
    pub const ORDERED: [TimestampFormat; 5] = [
        TimestampFormat::Rfc3339Fractional,
        TimestampFormat::Rfc3339,
        TimestampFormat::NaiveFractional,
        TimestampFormat::Naive,
        TimestampFormat::SpaceSeparated,
    ];

    /// Whether values in this format carry an explicit zone.
    pub fn has_zone(self) -> bool {
        matches!(
            self,
            TimestampFormat::Rfc3339Fractional | TimestampFormat::Rfc3339
        )
    }

    /// Try to parse `raw` strictly in this format.
    pub fn parse(self, raw: &str) -> Option<DateTime<FixedOffset>> {
        match self {
            TimestampFormat::Rfc3339Fractional => {
                if !has_fraction(raw) {
                    return None;
                }
                DateTime::parse_from_rfc3339(raw).ok()
            }
            TimestampFormat::Rfc3339 => {
                if has_fraction(raw) {
                    return None;
                }
                DateTime::parse_from_rfc3339(raw).ok()
            }
            TimestampFormat::NaiveFractional => {
                // %.f は小数部が無くても通ってしまうので先に弾く
                if !has_fraction(raw) {
                    return None;
                }
                parse_naive_utc(raw, "%Y-%m-%dT%H:%M:%S%.f")
            }
            TimestampFormat::Naive => parse_naive_utc(raw, "%Y-%m-%dT%H:%M:%S"),
            TimestampFormat::SpaceSeparated => parse_naive_utc(raw, "%Y-%m-%d %H:%M:%S%.f"),
        }
    }
}

/// A timestamp that matched one of the accepted formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTimestamp {
    pub value: DateTime<FixedOffset>,
    pub format: TimestampFormat,
}

impl ParsedTimestamp {
    pub fn had_zone(&self) -> bool {
        self.format.has_zone()
    }
}

/// None of the accepted formats matched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to parse timestamp: {raw:?}")]
pub struct UnparseableTimestamp {
    pub raw: String,
}

/// Resolve a producer-supplied timestamp.
///
/// Returns the first successful match in [`TimestampFormat::ORDERED`].
/// The caller decides the fallback; this function never guesses.
pub fn normalize_timestamp(raw: &str) -> Result<ParsedTimestamp, UnparseableTimestamp> {
    let trimmed = raw.trim();
    TimestampFormat::ORDERED
        .iter()
        .find_map(|format| {
            format.parse(trimmed).map(|value| ParsedTimestamp {
                value,
                format: *format,
            })
        })
        .ok_or_else(|| UnparseableTimestamp {
            raw: raw.to_string(),
        })
}

/// Look for a `.` inside the time-of-day part (after the `T`/space separator).
fn has_fraction(raw: &str) -> bool {
    raw.get(10..)
        .map(|time| time.contains('.'))
        .unwrap_or(false)
}

fn parse_naive_utc(raw: &str, fmt: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDateTime::parse_from_str(raw, fmt)
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Convenience for callers that only need UTC.
pub fn to_utc(value: DateTime<FixedOffset>) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}
