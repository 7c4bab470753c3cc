//! Half-open key spans and the range-span arithmetic used to address and
//! intersect shards.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::{Key, RKey};
use crate::metadata::{RangeDescriptor, RangeId};

/// Errors raised by span arithmetic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpanError {
    #[error("span {span} and the range {range} boundaries do not overlap")]
    NonOverlapping { span: RSpan, range: RangeId },
}

/// A span of keys: `[key, end_key)` when `end_key` is non-empty, the single
/// key `key` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub key: Key,
    pub end_key: Key,
}

impl Span {
    pub fn new(key: Key, end_key: Key) -> Self {
        Self { key, end_key }
    }

    /// A single-key span.
    pub fn point(key: Key) -> Self {
        Self {
            key,
            end_key: Key::default(),
        }
    }

    /// Returns whether the two spans overlap, treating an empty end key as a
    /// single-point span and excluding touching half-open boundaries.
    pub fn overlaps(&self, other: &Span) -> bool {
        if self.end_key.is_empty() && other.end_key.is_empty() {
            return self.key == other.key;
        }
        if self.end_key.is_empty() {
            return self.key >= other.key && self.key < other.end_key;
        }
        if other.end_key.is_empty() {
            return other.key >= self.key && other.key < self.end_key;
        }
        self.end_key > other.key && self.key < other.end_key
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end_key.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}-{}", self.key, self.end_key)
        }
    }
}

/// A key range with an inclusive start [`RKey`] and an exclusive end
/// [`RKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RSpan {
    pub key: RKey,
    pub end_key: RKey,
}

impl RSpan {
    pub fn new(key: RKey, end_key: RKey) -> Self {
        Self { key, end_key }
    }

    /// Returns whether this span contains the specified key.
    pub fn contains_key(&self, key: &RKey) -> bool {
        *key >= self.key && *key < self.end_key
    }

    /// Returns whether this span contains the specified end key when treated
    /// as exclusive: the span `["a", "b")` contains `"b"` as an exclusive
    /// end key.
    pub fn contains_exclusive_end_key(&self, key: &RKey) -> bool {
        *key > self.key && *key <= self.end_key
    }

    /// Returns whether this span contains the key range from `start`
    /// (inclusive) to `end` (exclusive). An empty or zero-width queried
    /// range degenerates to a point containment check on `start`.
    pub fn contains_key_range(&self, start: &RKey, end: &RKey) -> bool {
        if end.is_empty() {
            return self.contains_key(start);
        }
        if end < start {
            return false;
        }
        if end == start {
            return self.contains_key(start);
        }
        *start >= self.key && self.end_key >= *end
    }

    /// Computes the overlap between this span and the descriptor's range,
    /// failing when the two do not overlap. The returned end key is always
    /// non-empty and bounded by the descriptor: it is clamped to the
    /// descriptor's end whenever the descriptor does not already contain the
    /// full requested range. A span whose own end key is empty never passes
    /// the overlap test.
    pub fn intersect(&self, desc: &RangeDescriptor) -> Result<RSpan, SpanError> {
        if self.key >= desc.end_key || desc.start_key >= self.end_key {
            return Err(SpanError::NonOverlapping {
                span: self.clone(),
                range: desc.range_id,
            });
        }

        let mut key = self.key.clone();
        if key < desc.start_key {
            key = desc.start_key.clone();
        }
        let mut end_key = self.end_key.clone();
        if !desc.contains_key_range(&desc.start_key, &end_key) || end_key.is_empty() {
            end_key = desc.end_key.clone();
        }
        Ok(RSpan { key, end_key })
    }

    /// Reinterprets the span's resolved keys as raw keys.
    pub fn as_raw_span(&self) -> Span {
        Span {
            key: self.key.as_raw_key(),
            end_key: self.end_key.as_raw_key(),
        }
    }
}

impl fmt::Display for RSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.key, self.end_key)
    }
}
