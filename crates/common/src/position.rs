//! Ordering tokens used by the idempotency guard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Offset of a message within one partition of the message log.
///
/// Strictly increases per partition. Positions from different partitions
/// are not comparable with each other.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogPosition(i64);

impl LogPosition {
    /// Creates a position from a raw offset.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the position of the following message.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw offset.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LogPosition {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Logical position of an event: when it was produced, then where it sits in
/// its partition.
///
/// Compared lexicographically. The position only breaks ties between events
/// produced at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderingToken {
    pub produced_at: DateTime<Utc>,
    pub position: LogPosition,
}

impl OrderingToken {
    pub fn new(produced_at: DateTime<Utc>, position: LogPosition) -> Self {
        Self {
            produced_at,
            position,
        }
    }

    /// True when `self` should replace state recorded at `stored`.
    pub fn supersedes(&self, stored: &OrderingToken) -> bool {
        self > stored
    }
}

impl std::fmt::Display for OrderingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.produced_at.to_rfc3339(), self.position)
    }
}
