//! Time sharding: calendar shard keys and the directory layout built on them.

pub mod layout;
pub mod router;

pub use layout::{validate_field_name, ColumnRole, StoreLayout, CATALOG_FILE};
pub use router::{shard_key, Granularity, ShardKey, ShardRouter};

use crate::error::{Result, StoreError};
use chrono::NaiveDateTime;

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive).
    pub start: NaiveDateTime,
    /// End timestamp (exclusive).
    pub end: NaiveDateTime,
}

impl TimeRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidRange` unless `start < end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if end <= start {
            return Err(StoreError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Returns true if `ts` falls within the range.
    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        *ts >= self.start && *ts < self.end
    }
}
