//! Transaction errors
//!
//! Three families reach callers:
//! - conflicts (`Conflict`, `Phantom`): the transaction did not commit and
//!   may be retried from `begin()`
//! - storage failures: surfaced by the underlying connection, passed through
//! - misuse: rejected immediately, the transaction state is unchanged

use std::fmt;
use std::time::Duration;

use crate::coordinator::ConnectionId;
use crate::fingerprint::EvaluateOperation;

/// Result type for transaction operations
pub type TxnResult<T> = std::result::Result<T, TxnError>;

/// Which side of a committed change set overlapped a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeDirection {
    /// The commit added statements the read selects
    Added,
    /// The commit removed statements the read selects
    Removed,
}

impl fmt::Display for ChangeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeDirection::Added => write!(f, "added"),
            ChangeDirection::Removed => write!(f, "removed"),
        }
    }
}

/// A concurrent commit overlapped a tracked read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection {committer} {direction} statements observed by `{observed}`")]
pub struct Conflict {
    /// Connection whose commit caused the overlap
    pub committer: ConnectionId,
    /// The read that was affected
    pub observed: EvaluateOperation,
    /// Whether the added or removed delta matched
    pub direction: ChangeDirection,
}

/// Errors raised by an `OptimisticConnection`
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    /// A tracked read was affected by a concurrent commit (serializable)
    #[error("transaction conflict: {0}")]
    Conflict(Conflict),

    /// A read made after a detected change re-observed the changed data
    #[error("phantom read: `{observed}` depends on a concurrent commit")]
    Phantom {
        /// The later read that re-observed invalidated data
        observed: EvaluateOperation,
        /// The change detection that started the chain
        #[source]
        cause: Conflict,
    },

    /// Underlying store failure
    #[error("storage error: {0}")]
    Storage(#[from] trellis_core::Error),

    /// `begin()` while a transaction is running
    #[error("transaction already active")]
    AlreadyActive,

    /// A write was issued outside a transaction
    #[error("no active transaction")]
    NotActive,

    /// A write was issued after `prepare()`
    #[error("transaction is prepared, no further writes accepted")]
    Prepared,

    /// A write names a malformed statement
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    /// Isolation flag change not allowed in the current state
    #[error("isolation cannot change now: {0}")]
    IsolationLocked(String),

    /// Exclusive lock not granted in time
    #[error("timed out after {0:?} waiting for the exclusive lock")]
    LockTimeout(Duration),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TxnError {
    /// Check if the error means "did not commit, safe to retry"
    pub fn is_conflict(&self) -> bool {
        matches!(self, TxnError::Conflict(_) | TxnError::Phantom { .. })
    }

    /// The originating conflict, if any
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            TxnError::Conflict(conflict) => Some(conflict),
            TxnError::Phantom { cause, .. } => Some(cause),
            _ => None,
        }
    }
}
