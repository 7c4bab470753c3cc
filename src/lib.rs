//! Core data model for QuartzDB, a distributed, range-partitioned,
//! transactional key-value store.
//!
//! The modules here define the self-describing value encoding used on every
//! read/write path, the hybrid-logical-clock timestamp ordering MVCC
//! versions, the transaction record coordinating concurrent writers, and
//! the key-range primitives addressing shards. Replication, storage and the
//! query layer build on these types and live in separate crates.

pub mod duration;
pub mod encoding;
pub mod keys;
pub mod lease;
pub mod metadata;
pub mod span;
pub mod timeseries;
pub mod timestamp;
pub mod txn;
pub mod value;

pub use duration::{Duration, DurationError};
pub use encoding::EncodingError;
pub use keys::{Key, KeyFormatter, QuotedKeyFormatter, RKey};
pub use lease::Lease;
pub use metadata::{NodeId, RangeDescriptor, RangeId, ReplicaDescriptor, ReplicaId, StoreId};
pub use span::{RSpan, Span, SpanError};
pub use timeseries::{InternalTimeSeriesData, InternalTimeSeriesSample};
pub use timestamp::Timestamp;
pub use txn::{
    Intent, IsolationLevel, MAX_USER_PRIORITY, MIN_USER_PRIORITY, NORMAL_USER_PRIORITY,
    Transaction, TransactionStatus, TxnMeta, UserPriority, as_intents, make_priority, same_txn,
    txn_id_equal,
};
pub use value::{KeyValue, Value, ValueError, ValueTag};
