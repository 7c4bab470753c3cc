use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hybrid-logical-clock reading: wall-clock nanoseconds plus a logical
/// counter breaking ties between events within the same nanosecond.
///
/// The derived ordering is total: primarily by `wall_time`, ties broken by
/// `logical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Wall time in nanoseconds since the Unix epoch.
    pub wall_time: i64,
    /// Logical tie-breaking counter, in `[0, i32::MAX]`.
    pub logical: i32,
}

impl Timestamp {
    /// An empty timestamp.
    pub const ZERO: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };
    /// The minimum valid timestamp.
    pub const MIN: Timestamp = Timestamp {
        wall_time: 0,
        logical: 1,
    };
    /// The maximum representable timestamp.
    pub const MAX: Timestamp = Timestamp {
        wall_time: i64::MAX,
        logical: i32::MAX,
    };

    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// Reports whether this timestamp precedes `other`.
    pub fn less(&self, other: Timestamp) -> bool {
        *self < other
    }

    /// Returns a timestamp with both components offset by the given amounts.
    pub fn add(&self, wall_time: i64, logical: i32) -> Timestamp {
        Timestamp {
            wall_time: self.wall_time + wall_time,
            logical: self.logical + logical,
        }
    }

    /// Returns the next later timestamp, carrying into `wall_time` at the
    /// logical boundary.
    ///
    /// # Panics
    ///
    /// Panics when called on [`Timestamp::MAX`]; advancing past the maximum
    /// representable timestamp is a caller contract violation.
    pub fn next(&self) -> Timestamp {
        if self.logical == i32::MAX {
            if self.wall_time == i64::MAX {
                panic!("cannot take the next value to a max timestamp");
            }
            return Timestamp {
                wall_time: self.wall_time + 1,
                logical: 0,
            };
        }
        Timestamp {
            wall_time: self.wall_time,
            logical: self.logical + 1,
        }
    }

    /// Returns the next earlier timestamp, borrowing from `wall_time` at the
    /// logical boundary.
    ///
    /// # Panics
    ///
    /// Panics when called on [`Timestamp::ZERO`]; there is no timestamp
    /// before the zero timestamp.
    pub fn prev(&self) -> Timestamp {
        if self.logical > 0 {
            return Timestamp {
                wall_time: self.wall_time,
                logical: self.logical - 1,
            };
        }
        if self.wall_time > 0 {
            return Timestamp {
                wall_time: self.wall_time - 1,
                logical: i32::MAX,
            };
        }
        panic!("cannot take the previous value to a zero timestamp");
    }

    /// Ratchets this timestamp forward to `other` if `other` is later.
    ///
    /// Together with [`Timestamp::backward`] this is the sole mutation
    /// primitive for monotonic merges; all higher-level ratchets are built
    /// from these two.
    pub fn forward(&mut self, other: Timestamp) {
        if *self < other {
            *self = other;
        }
    }

    /// Ratchets this timestamp backward to `other` if `other` is earlier.
    pub fn backward(&mut self, other: Timestamp) {
        if other < *self {
            *self = other;
        }
    }

    /// Converts the wall-time component to a UTC instant.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.wall_time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09},{}",
            self.wall_time / 1_000_000_000,
            self.wall_time % 1_000_000_000,
            self.logical
        )
    }
}
