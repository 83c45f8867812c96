//! Trellis - optimistic transaction isolation for mutable triple stores
//!
//! Trellis lets many clients read and write a quad store concurrently
//! without write locks in the common case, while offering snapshot and
//! serializable isolation with conflict detection at commit.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use trellis::{LocalCoordinator, MemoryStore, OptimisticConnection, Term};
//!
//! let store = MemoryStore::new();
//! let coordinator = Arc::new(LocalCoordinator::new());
//! let conn = OptimisticConnection::new(store.connection(), coordinator);
//!
//! conn.transaction(|txn| {
//!     txn.add(Term::iri("x:alice"), Term::iri("foaf:knows"), Term::iri("x:bob"), &[])
//! })?;
//! ```
//!
//! # Architecture
//!
//! - `trellis-core`: terms, statements, the `Model` delta set, queries and
//!   the `StoreConnection` trait a storage engine implements
//! - `trellis-storage`: an in-memory reference store
//! - `trellis-concurrency`: `OptimisticConnection`, the ledger and the
//!   `Coordinator`

pub use trellis_concurrency::*;
pub use trellis_core::{
    evaluate, BindingSet, Dataset, Error, Literal, Model, Namespace, PatternTerm, QueryExpr,
    Result, Statement, StatementPattern, StatementSource, StoreConnection, Term, TriplePattern,
};
pub use trellis_storage::{MemoryConnection, MemoryStore};
