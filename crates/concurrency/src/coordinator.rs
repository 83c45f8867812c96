//! Transaction coordinator
//!
//! The coordinator is the only channel between connections. It owns:
//! - the commit gate, a reader-writer lock held shared by reads that
//!   compose the overlay and exclusive by a committing or write-through
//!   transaction
//! - the participant registry used to fan committed change sets out
//! - the `effects()` predicate that defines what a conflict is
//!
//! Lock order across the crate is: connection state, then the commit gate,
//! then a connection's ledger. Fan-out runs while the committer holds the
//! gate exclusively, so no registered read can interleave with it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use tracing::{debug, trace};
use trellis_core::Model;
use uuid::Uuid;

use crate::error::{TxnError, TxnResult};
use crate::fingerprint::EvaluateOperation;

/// Shared hold on the commit gate
pub type ReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;

/// Exclusive hold on the commit gate
pub type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Unique identity of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Net effect of one committed transaction
///
/// Immutable once published; shared between every notified connection.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Committing connection
    pub source: ConnectionId,
    /// Statements the commit added
    pub added: Model,
    /// Statements the commit removed
    pub removed: Model,
    /// Commit time
    pub committed_at: DateTime<Utc>,
}

impl ChangeSet {
    /// Package a commit's deltas
    pub fn new(source: ConnectionId, added: Model, removed: Model) -> Self {
        Self {
            source,
            added,
            removed,
            committed_at: Utc::now(),
        }
    }

    /// Check if the commit changed no statement
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A connection as seen by the coordinator
pub trait TransactionParticipant: Send + Sync {
    /// Identity of the connection
    fn id(&self) -> ConnectionId;

    /// Check if the running transaction is snapshot or stronger
    fn tracks_reads(&self) -> bool;

    /// Another connection committed while this one is active
    fn changed(&self, change: &Arc<ChangeSet>);
}

/// Observer of every committed change set
pub trait CommitListener: Send + Sync {
    /// Called once per successful commit, after participants are notified
    fn committed(&self, change: &Arc<ChangeSet>);
}

/// Cross-connection arbitration used by `OptimisticConnection`
pub trait Coordinator: Send + Sync {
    /// Register a transaction slot
    fn begin(&self, id: ConnectionId, participant: Weak<dyn TransactionParticipant>);

    /// Release a transaction slot
    fn end(&self, id: ConnectionId);

    /// Shared lock held while a read composes the overlay
    fn read_lock(&self) -> ReadGuard;

    /// Become the sole writer, blocking up to `timeout` (forever if `None`)
    ///
    /// # Errors
    ///
    /// Returns `TxnError::LockTimeout` if the lock is not granted in time.
    fn exclusive(&self, id: ConnectionId, timeout: Option<Duration>) -> TxnResult<ExclusiveGuard>;

    /// Hook called before an overlay transaction is checked and flushed
    ///
    /// # Errors
    ///
    /// Returns `TxnError::LockTimeout` if the commit gate is not granted.
    fn prepare(&self, id: ConnectionId, timeout: Option<Duration>) -> TxnResult<ExclusiveGuard>;

    /// Check if a delta overlaps what a read selects
    fn effects(&self, delta: &Model, read: &EvaluateOperation) -> bool;

    /// Publish a committed change set to every other tracking participant
    fn end_and_notify(&self, id: ConnectionId, change: ChangeSet);

    /// Check if anyone would receive a published change set
    fn is_listener_present(&self) -> bool;
}

#[derive(Clone)]
struct Slot {
    participant: Weak<dyn TransactionParticipant>,
    committed: bool,
}

/// In-process coordinator
///
/// # Memory Ordering
///
/// Metric counters use Relaxed ordering; they are observational only and
/// do not synchronize other memory.
pub struct LocalCoordinator {
    gate: Arc<RwLock<()>>,
    participants: DashMap<ConnectionId, Slot>,
    commit_listeners: RwLock<Vec<Arc<dyn CommitListener>>>,
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
}

impl LocalCoordinator {
    /// Create a coordinator with no participants
    pub fn new() -> Self {
        Self {
            gate: Arc::new(RwLock::new(())),
            participants: DashMap::new(),
            commit_listeners: RwLock::new(Vec::new()),
            active_count: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_aborted: AtomicU64::new(0),
        }
    }

    /// Register an observer of committed change sets
    pub fn add_commit_listener(&self, listener: Arc<dyn CommitListener>) {
        self.commit_listeners.write().push(listener);
    }

    /// Ids of the connections holding a transaction slot
    pub fn active_participants(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.participants.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Get transaction metrics
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }

    fn acquire(&self, timeout: Option<Duration>) -> TxnResult<ExclusiveGuard> {
        match timeout {
            None => Ok(self.gate.write_arc()),
            Some(limit) => self
                .gate
                .try_write_arc_for(limit)
                .ok_or(TxnError::LockTimeout(limit)),
        }
    }

    fn decrement_active(&self) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }
}

impl Default for LocalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCoordinator")
            .field("participants", &self.participants.len())
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl Coordinator for LocalCoordinator {
    fn begin(&self, id: ConnectionId, participant: Weak<dyn TransactionParticipant>) {
        let previous = self.participants.insert(
            id,
            Slot {
                participant,
                committed: false,
            },
        );
        if previous.is_none() {
            self.active_count.fetch_add(1, Ordering::Relaxed);
            self.total_started.fetch_add(1, Ordering::Relaxed);
        }
        trace!(target: "trellis::txn", connection = %id, "Slot registered");
    }

    fn end(&self, id: ConnectionId) {
        if let Some((_, slot)) = self.participants.remove(&id) {
            self.decrement_active();
            if slot.committed {
                self.total_committed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.total_aborted.fetch_add(1, Ordering::Relaxed);
            }
            trace!(target: "trellis::txn", connection = %id, committed = slot.committed, "Slot released");
        }
    }

    fn read_lock(&self) -> ReadGuard {
        self.gate.read_arc()
    }

    fn exclusive(&self, id: ConnectionId, timeout: Option<Duration>) -> TxnResult<ExclusiveGuard> {
        let guard = self.acquire(timeout)?;
        trace!(target: "trellis::txn", connection = %id, "Exclusive lock granted");
        Ok(guard)
    }

    fn prepare(&self, id: ConnectionId, timeout: Option<Duration>) -> TxnResult<ExclusiveGuard> {
        let guard = self.acquire(timeout)?;
        trace!(target: "trellis::txn", connection = %id, "Commit gate held for prepare");
        Ok(guard)
    }

    fn effects(&self, delta: &Model, read: &EvaluateOperation) -> bool {
        if delta.is_empty() {
            return false;
        }
        read.footprint()
            .iter()
            .any(|pattern| delta.any_match(pattern))
    }

    fn end_and_notify(&self, id: ConnectionId, change: ChangeSet) {
        if let Some(mut slot) = self.participants.get_mut(&id) {
            slot.committed = true;
        }

        let change = Arc::new(change);
        // Snapshot the registry so no shard lock is held during callbacks
        let targets: Vec<Arc<dyn TransactionParticipant>> = self
            .participants
            .iter()
            .filter(|entry| *entry.key() != id)
            .filter_map(|entry| entry.value().participant.upgrade())
            .collect();

        let mut notified = 0usize;
        for participant in targets {
            if participant.tracks_reads() {
                participant.changed(&change);
                notified += 1;
            }
        }

        let listeners = self.commit_listeners.read().clone();
        for listener in &listeners {
            listener.committed(&change);
        }

        debug!(
            target: "trellis::txn",
            connection = %id,
            added = change.added.len(),
            removed = change.removed.len(),
            notified,
            listeners = listeners.len(),
            "Change set published"
        );
    }

    fn is_listener_present(&self) -> bool {
        !self.commit_listeners.read().is_empty() || self.participants.len() > 1
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction lifecycle.
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Number of currently active transactions
    pub active_count: u64,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions committed
    pub total_committed: u64,
    /// Total number of transactions aborted
    pub total_aborted: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + aborted)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }
}
