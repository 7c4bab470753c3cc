use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metadata::{ReplicaDescriptor, StoreId};
use crate::timestamp::Timestamp;

/// Grants one replica authority to serve a range from `start` through
/// `expiration`. Writes are only safe up to `start_stasis`, which precedes
/// the expiration by the maximum tolerated clock skew.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub start: Timestamp,
    /// Boundary of the stasis period: no new writes are accepted at or
    /// after this timestamp.
    pub start_stasis: Timestamp,
    pub expiration: Timestamp,
    pub replica: ReplicaDescriptor,
}

impl Lease {
    /// Returns true if the given timestamp can be served under this lease,
    /// i.e. it precedes the stasis period.
    pub fn covers(&self, timestamp: Timestamp) -> bool {
        timestamp < self.start_stasis
    }

    /// Returns whether the given store holds this lease.
    pub fn owned_by(&self, store_id: StoreId) -> bool {
        self.replica.store_id == store_id
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.start.to_datetime();
        let expiration = self.expiration.to_datetime();
        write!(
            f,
            "replica {} {} {}ns",
            self.replica,
            start.to_rfc3339(),
            (expiration - start).num_nanoseconds().unwrap_or(i64::MAX)
        )
    }
}
