//! Read tracking and the inconsistency ledger
//!
//! The ledger holds the fingerprints of every read made by a snapshot or
//! serializable transaction, and one `InconsistentChange` per concurrent
//! commit that overlapped one of them. Reads registered after a change was
//! recorded are appended to that change's `subsequent_observations`; the
//! commit-time phantom scan looks only at those.
//!
//! The ledger is guarded by its own mutex inside the connection so that a
//! concurrent `changed()` never waits behind store I/O.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::trace;
use trellis_core::Model;

use crate::coordinator::ChangeSet;
use crate::error::{ChangeDirection, Conflict, TxnError};
use crate::fingerprint::EvaluateOperation;

/// A concurrent commit that overlapped a tracked read
#[derive(Debug, Clone)]
pub struct InconsistentChange {
    /// The published change set
    pub change: Arc<ChangeSet>,
    /// The read it overlapped, as a conflict
    pub conflict: Conflict,
    /// Distinct reads registered after the change was recorded
    pub subsequent_observations: Vec<EvaluateOperation>,
    subsequent_seen: FxHashSet<EvaluateOperation>,
}

/// Tracked reads plus detected changes of one transaction
#[derive(Debug, Default)]
pub struct Ledger {
    // Registration order, deduplicated through `seen`
    observed: Vec<EvaluateOperation>,
    seen: FxHashSet<EvaluateOperation>,
    changes: Vec<InconsistentChange>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a read
    pub fn observe(&mut self, read: EvaluateOperation) {
        for change in &mut self.changes {
            if change.subsequent_seen.insert(read.clone()) {
                change.subsequent_observations.push(read.clone());
            }
        }
        if self.seen.insert(read.clone()) {
            self.observed.push(read);
        }
    }

    /// Record a concurrent commit if it overlaps a tracked read
    ///
    /// Reads are scanned in registration order; for each, the added delta is
    /// tested before the removed one. Returns whether a change was recorded.
    pub fn changed<F>(&mut self, change: &Arc<ChangeSet>, effects: F) -> bool
    where
        F: Fn(&Model, &EvaluateOperation) -> bool,
    {
        let hit = self.observed.iter().find_map(|read| {
            if effects(&change.added, read) {
                Some((read, ChangeDirection::Added))
            } else if effects(&change.removed, read) {
                Some((read, ChangeDirection::Removed))
            } else {
                None
            }
        });

        let Some((read, direction)) = hit else {
            return false;
        };
        let conflict = Conflict {
            committer: change.source,
            observed: read.clone(),
            direction,
        };
        trace!(target: "trellis::txn", %conflict, "Inconsistent change recorded");
        self.changes.push(InconsistentChange {
            change: Arc::clone(change),
            conflict,
            subsequent_observations: Vec::new(),
            subsequent_seen: FxHashSet::default(),
        });
        true
    }

    /// Conflict of the earliest recorded change
    pub fn first_conflict(&self) -> Option<&Conflict> {
        self.changes.first().map(|change| &change.conflict)
    }

    /// Find a read that re-observed data invalidated by a recorded change
    pub fn find_phantom<F>(&self, effects: F) -> Option<TxnError>
    where
        F: Fn(&Model, &EvaluateOperation) -> bool,
    {
        self.changes.iter().find_map(|entry| {
            entry
                .subsequent_observations
                .iter()
                .find(|read| {
                    effects(&entry.change.added, read) || effects(&entry.change.removed, read)
                })
                .map(|read| TxnError::Phantom {
                    observed: read.clone(),
                    cause: entry.conflict.clone(),
                })
        })
    }

    /// Recorded changes in detection order
    pub fn changes(&self) -> &[InconsistentChange] {
        &self.changes
    }

    /// Number of distinct tracked reads
    pub fn observed_len(&self) -> usize {
        self.observed.len()
    }

    /// Number of recorded changes
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if no change was recorded
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Forget every read and change
    pub fn clear(&mut self) {
        self.observed.clear();
        self.seen.clear();
        self.changes.clear();
    }
}
