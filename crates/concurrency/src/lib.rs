//! Concurrency layer for Trellis
//!
//! This crate implements optimistic transaction isolation over any
//! `StoreConnection`:
//! - OptimisticConnection: per-connection transaction state machine
//! - Operations: staged writes grouped per update, overlaid on every read
//! - Ledger: tracked reads and the concurrent commits that overlapped them
//! - Snapshot isolation (phantom-read escalation) and serializable isolation
//! - Coordinator: commit gate, change-set fan-out and the conflict predicate
//!
//! Connections never talk to each other directly; every cross-connection
//! interaction goes through a `Coordinator`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod listener;
pub mod merger;
pub mod operation;
pub mod overlay;

pub use config::{IsolationLevel, RetryConfig, TrellisConfig, CONFIG_FILE_NAME};
pub use connection::{OptimisticConnection, PendingChanges};
pub use coordinator::{
    ChangeSet, CommitListener, ConnectionId, Coordinator, LocalCoordinator, TransactionMetrics,
    TransactionParticipant,
};
pub use error::{ChangeDirection, Conflict, TxnError, TxnResult};
pub use fingerprint::{EvaluateOperation, ReadExpr};
pub use ledger::{InconsistentChange, Ledger};
pub use listener::ConnectionListener;
pub use merger::{DeltaMerger, OverlayMerger, OverlaySource};
pub use operation::{Operation, OperationArena, OperationId, OperationKind, UpdateContext};
pub use overlay::{ContextOverlay, NamespaceOverlay};
