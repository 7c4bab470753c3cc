//! Range addressing metadata: the identifiers naming nodes, stores and
//! replicas, and the descriptor bounding one contiguous shard of the
//! keyspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keys::RKey;
use crate::span::RSpan;

/// Identifier of a node within the cluster.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub i32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a store (one disk) within a node.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StoreId(pub i32);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a replica of one range, unique within that range.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ReplicaId(pub i32);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a range.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RangeId(pub i64);

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One replica of a range, pinned to a store on a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub node_id: NodeId,
    pub store_id: StoreId,
    pub replica_id: ReplicaId,
}

impl fmt::Display for ReplicaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(n{},s{}):{}",
            self.node_id, self.store_id, self.replica_id
        )
    }
}

/// Boundary descriptor of one contiguous shard of the keyspace,
/// `[start_key, end_key)`, and the replicas serving it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    pub range_id: RangeId,
    pub start_key: RKey,
    pub end_key: RKey,
    pub replicas: Vec<ReplicaDescriptor>,
    /// The replica id to assign to the next replica added to this range.
    pub next_replica_id: ReplicaId,
}

impl RangeDescriptor {
    /// The descriptor's bounds as a range span.
    pub fn rspan(&self) -> RSpan {
        RSpan::new(self.start_key.clone(), self.end_key.clone())
    }

    /// Returns whether this range contains the specified key.
    pub fn contains_key(&self, key: &RKey) -> bool {
        self.rspan().contains_key(key)
    }

    /// Returns whether this range contains the specified key range from
    /// `start` (inclusive) to `end` (exclusive).
    pub fn contains_key_range(&self, start: &RKey, end: &RKey) -> bool {
        self.rspan().contains_key_range(start, end)
    }

    /// The descriptor for the replica residing on the given store, if any.
    pub fn replica_on_store(&self, store_id: StoreId) -> Option<&ReplicaDescriptor> {
        self.replicas.iter().find(|r| r.store_id == store_id)
    }
}
