//! Transaction records and the priority machinery used to settle write
//! conflicts between concurrent transactions.

use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::keys::Key;
use crate::metadata::NodeId;
use crate::span::Span;
use crate::timestamp::Timestamp;

/// User-level priority factor biasing conflict resolution. A transaction run
/// at priority `p1` wins a conflict against one at `p2` with probability
/// `p1 / (p1 + p2)`.
pub type UserPriority = f64;

/// Smallest accepted user priority.
pub const MIN_USER_PRIORITY: UserPriority = 0.001;
/// The neutral priority: conflicts are settled by a fair coin.
pub const NORMAL_USER_PRIORITY: UserPriority = 1.0;
/// Largest accepted user priority.
pub const MAX_USER_PRIORITY: UserPriority = 1000.0;

/// Isolation level a transaction runs at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    #[default]
    Serializable,
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::Serializable => f.write_str("SERIALIZABLE"),
            IsolationLevel::Snapshot => f.write_str("SNAPSHOT"),
        }
    }
}

/// Lifecycle states of a transaction record. `Committed` and `Aborted` are
/// terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[default]
    Pending,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => f.write_str("PENDING"),
            TransactionStatus::Committed => f.write_str("COMMITTED"),
            TransactionStatus::Aborted => f.write_str("ABORTED"),
        }
    }
}

/// The subset of transaction state that rides along with every write intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxnMeta {
    /// Globally unique identifier; `None` until the record is initialized.
    pub id: Option<Uuid>,
    /// Originating key, chosen for co-location with the data the
    /// transaction touches.
    pub key: Key,
    pub isolation: IsolationLevel,
    pub timestamp: Timestamp,
    pub priority: i32,
    pub sequence: u32,
}

/// A provisional write at a span of keys, attributed to a transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub span: Span,
    pub txn: TxnMeta,
    pub status: TransactionStatus,
}

/// Converts a slice of spans into intents for the given transaction.
pub fn as_intents(spans: &[Span], txn: &Transaction) -> Vec<Intent> {
    spans
        .iter()
        .map(|span| Intent {
            span: span.clone(),
            txn: txn.meta.clone(),
            status: txn.status,
        })
        .collect()
}

/// Generates a random priority value biased by the specified user priority:
/// at `user_priority == 100` the result is 100x more likely to exceed a
/// priority rolled at the neutral setting. The exponential distribution is
/// used because its memoryless property makes the win probability exactly
/// proportional to the priority ratio.
///
/// A negative `user_priority` is an explicit-priority escape hatch used for
/// deterministic testing: the returned priority is simply `-user_priority`.
///
/// # Panics
///
/// Panics when the magnitude of a negative `user_priority` exceeds
/// `i32::MAX`.
pub fn make_priority(user_priority: UserPriority) -> i32 {
    if user_priority < 0.0 {
        if -user_priority > i32::MAX as f64 {
            panic!("cannot set explicit priority to a value less than -{}", i32::MAX);
        }
        return (-user_priority) as i32;
    }
    let user_priority = if user_priority == 0.0 {
        NORMAL_USER_PRIORITY
    } else {
        user_priority.clamp(MIN_USER_PRIORITY, MAX_USER_PRIORITY)
    };

    // Sample X ~ Exponential(rate 1/user_priority) via inversion; the
    // (0, 1] argument keeps ln away from zero.
    let uniform: f64 = rand::thread_rng().r#gen();
    let val = -(1.0 - uniform).ln() * user_priority;

    // Rescale so the maximum priority has roughly five standard deviations
    // of headroom before saturating at i32::MAX.
    let val = val / (5.0 * MAX_USER_PRIORITY) * i32::MAX as f64;
    if val >= i32::MAX as f64 {
        return i32::MAX;
    }
    val as i32
}

/// Returns whether the transaction identifiers are equal. Two missing
/// identifiers compare equal.
pub fn txn_id_equal(a: Option<&Uuid>, b: Option<&Uuid>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Tests two transaction records for identity: equal when both are absent,
/// or both present with matching identifiers. Other fields are irrelevant.
pub fn same_txn(a: Option<&Transaction>, b: Option<&Transaction>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => txn_id_equal(a.meta.id.as_ref(), b.meta.id.as_ref()),
        _ => false,
    }
}

/// A client transaction attempt and the coordination state accumulated over
/// its life: restarts bump the epoch while keeping the identifier, and
/// server-authoritative copies are merged in through [`Transaction::update`].
///
/// Cloning deep-copies the observed-timestamp map and the intent list; the
/// identifier and originating key are immutable once set and may be shared
/// freely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub meta: TxnMeta,
    /// Human-readable label for diagnostics.
    pub name: String,
    pub status: TransactionStatus,
    /// Restart counter; incremented in place on every retry of this client
    /// attempt.
    pub epoch: u32,
    pub last_heartbeat: Option<Timestamp>,
    /// The timestamp the current attempt started at.
    pub orig_timestamp: Timestamp,
    /// Upper bound of the clock-uncertainty window:
    /// `orig_timestamp + max clock offset`.
    pub max_timestamp: Timestamp,
    /// Per-node lowest clock reading observed during this transaction; lets
    /// reads narrow the uncertainty window when revisiting a node.
    pub observed_timestamps: HashMap<NodeId, Timestamp>,
    pub writing: bool,
    pub write_too_old: bool,
    pub retry_on_push: bool,
    pub intents: Vec<Span>,
}

impl Transaction {
    /// Creates a new transaction. The base key co-locates the transaction
    /// record with the data it affects; a random identifier guarantees
    /// uniqueness. `max_offset` is the maximum tolerated clock skew in
    /// nanoseconds.
    pub fn new(
        name: &str,
        base_key: Key,
        user_priority: UserPriority,
        isolation: IsolationLevel,
        now: Timestamp,
        max_offset: i64,
    ) -> Transaction {
        let priority = make_priority(user_priority);
        let max_timestamp = now.add(max_offset, 0);

        Transaction {
            meta: TxnMeta {
                id: Some(Uuid::new_v4()),
                key: base_key,
                isolation,
                timestamp: now,
                priority,
                sequence: 1,
            },
            name: name.to_owned(),
            orig_timestamp: now,
            max_timestamp,
            ..Transaction::default()
        }
    }

    /// Returns true once the record carries an identifier.
    pub fn is_initialized(&self) -> bool {
        self.meta.id.is_some()
    }

    /// The last timestamp at which client activity definitely occurred: the
    /// maximum of the original timestamp and the last heartbeat.
    pub fn last_active(&self) -> Timestamp {
        let mut candidate = self.orig_timestamp;
        if let Some(heartbeat) = self.last_heartbeat
            && candidate < heartbeat
        {
            candidate = heartbeat;
        }
        candidate
    }

    /// Reconfigures the record for an in-place restart: the epoch is
    /// incremented, the timestamp moves forward to at least `timestamp`, and
    /// the priority is raised to the maximum of the current priority, a
    /// fresh roll from `user_priority`, and the conflicting transaction's
    /// `upgrade_priority`. Flags describing the abandoned attempt are
    /// cleared.
    pub fn restart(
        &mut self,
        user_priority: UserPriority,
        upgrade_priority: i32,
        timestamp: Timestamp,
    ) {
        self.epoch += 1;
        self.meta.timestamp.forward(timestamp);
        self.orig_timestamp = self.meta.timestamp;
        self.upgrade_priority(make_priority(user_priority));
        self.upgrade_priority(upgrade_priority);
        self.write_too_old = false;
        self.retry_on_push = false;
        debug!(epoch = self.epoch, timestamp = %self.meta.timestamp, "transaction restarted");
    }

    /// Ratchets this record toward a server-authoritative copy. A record
    /// with no identifier yet is wholesale replaced; otherwise epochs,
    /// sequences and priorities take the larger value, timestamps only move
    /// forward, terminal statuses win, and the uncertainty bookkeeping is
    /// absorbed entry by entry. `write_too_old` and `retry_on_push` are
    /// overwritten rather than OR'd: they describe the freshest attempt,
    /// not an accumulated history.
    pub fn update(&mut self, other: &Transaction) {
        if self.meta.id.is_none() {
            *self = other.clone();
            return;
        }
        if self.meta.key.is_empty() {
            self.meta.key = other.meta.key.clone();
        }
        if other.status != TransactionStatus::Pending {
            self.status = other.status;
        }
        if self.epoch < other.epoch {
            self.epoch = other.epoch;
        }
        self.meta.timestamp.forward(other.meta.timestamp);
        self.orig_timestamp.forward(other.orig_timestamp);
        self.max_timestamp.forward(other.max_timestamp);
        if let Some(other_heartbeat) = other.last_heartbeat {
            let heartbeat = self.last_heartbeat.get_or_insert(Timestamp::ZERO);
            heartbeat.forward(other_heartbeat);
        }

        for (&node_id, &ts) in &other.observed_timestamps {
            self.update_observed_timestamp(node_id, ts);
        }
        self.upgrade_priority(other.meta.priority);
        self.writing = self.writing || other.writing;
        self.write_too_old = other.write_too_old;
        self.retry_on_push = other.retry_on_push;
        if self.meta.sequence < other.meta.sequence {
            self.meta.sequence = other.meta.sequence;
        }
        if !other.intents.is_empty() {
            self.intents = other.intents.clone();
        }
    }

    /// Raises the transaction priority to at least `min_priority`.
    pub fn upgrade_priority(&mut self, min_priority: i32) {
        if min_priority > self.meta.priority {
            self.meta.priority = min_priority;
        }
    }

    /// Records a clock reading from the given node. When multiple readings
    /// arrive for one node, the lowest prevails: a lower observed bound
    /// proves no value could have been written there after that instant, so
    /// later reads from the node may narrow their uncertainty window to it.
    pub fn update_observed_timestamp(&mut self, node_id: NodeId, ts: Timestamp) {
        match self.observed_timestamps.get(&node_id) {
            Some(&existing) if existing <= ts => {}
            _ => {
                self.observed_timestamps.insert(node_id, ts);
            }
        }
    }

    /// The lowest clock reading recorded from the given node during this
    /// transaction, if any.
    pub fn get_observed_timestamp(&self, node_id: NodeId) -> Option<Timestamp> {
        self.observed_timestamps.get(&node_id).copied()
    }

    /// Clears all per-node clock readings.
    pub fn reset_observed_timestamps(&mut self) {
        self.observed_timestamps.clear();
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.name.is_empty() {
            write!(f, "{:?} ", self.name)?;
        }
        let id = match &self.meta.id {
            Some(id) => id.simple().to_string()[..8].to_owned(),
            None => "<none>".to_owned(),
        };
        // Priority rendered as a 0-100 float for readability.
        let pri = 100.0 * self.meta.priority as f64 / i32::MAX as f64;
        write!(
            f,
            "id={} key={} rw={} pri={:.8} iso={} stat={} epo={} ts={} orig={} max={} wto={} rop={}",
            id,
            self.meta.key,
            self.writing,
            pri,
            self.meta.isolation,
            self.status,
            self.epoch,
            self.meta.timestamp,
            self.orig_timestamp,
            self.max_timestamp,
            self.write_too_old,
            self.retry_on_push
        )
    }
}
