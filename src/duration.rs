use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NANOS_PER_DAY: i64 = 24 * 60 * 60 * 1_000_000_000;
const DAYS_PER_MONTH: i64 = 30;

/// Errors raised when a calendar duration cannot be represented on the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("duration {0} out of range")]
    OutOfRange(Duration),
}

/// A calendar duration: months and days are kept separate from nanoseconds
/// because their wall-clock length depends on the instant they are applied
/// to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub nanos: i64,
}

impl Duration {
    pub const fn new(months: i64, days: i64, nanos: i64) -> Self {
        Self {
            months,
            days,
            nanos,
        }
    }

    /// Flattens the duration for order-preserving storage, assuming 30-day
    /// months. Returns `(sort_nanos, months, days)`; fails when the
    /// flattened nanosecond count overflows.
    pub fn encode(&self) -> Result<(i64, i64, i64), DurationError> {
        let month_nanos = self
            .months
            .checked_mul(DAYS_PER_MONTH)
            .and_then(|d| d.checked_mul(NANOS_PER_DAY));
        let day_nanos = self.days.checked_mul(NANOS_PER_DAY);
        let sort_nanos = match (month_nanos, day_nanos) {
            (Some(m), Some(d)) => m.checked_add(d).and_then(|md| md.checked_add(self.nanos)),
            _ => None,
        };
        match sort_nanos {
            Some(sort_nanos) => Ok((sort_nanos, self.months, self.days)),
            None => Err(DurationError::OutOfRange(*self)),
        }
    }

    /// Inverse of [`Duration::encode`].
    pub fn decode(sort_nanos: i64, months: i64, days: i64) -> Self {
        let nanos = sort_nanos - months * DAYS_PER_MONTH * NANOS_PER_DAY - days * NANOS_PER_DAY;
        Self {
            months,
            days,
            nanos,
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mon{}d{}ns", self.months, self.days, self.nanos)
    }
}
