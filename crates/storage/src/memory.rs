//! MemoryStore: shared in-memory quad store
//!
//! This module implements the shared state behind every `MemoryConnection`:
//! - `Model` for the ordered statement set
//! - `BTreeMap` for namespace prefix bindings
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` commit version, incremented once per native commit
//!
//! # Design Notes
//!
//! - **No history**: only the latest state is kept
//! - **Atomic apply**: a native commit replays its journal under a single
//!   write lock acquisition, so no reader sees a partial transaction

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use trellis_core::{Model, Namespace, Statement, StatementPattern, Term};

use crate::connection::MemoryConnection;

/// Contents of a store: statements plus namespace table
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreData {
    pub(crate) statements: Model,
    pub(crate) namespaces: BTreeMap<String, String>,
}

impl StoreData {
    pub(crate) fn statements(&self, pattern: &StatementPattern) -> Vec<Statement> {
        self.statements.filter(pattern).cloned().collect()
    }

    pub(crate) fn context_ids(&self) -> Vec<Term> {
        self.statements.named_contexts().into_iter().collect()
    }

    pub(crate) fn namespaces(&self) -> Vec<Namespace> {
        self.namespaces
            .iter()
            .map(|(prefix, name)| Namespace::new(prefix.clone(), name.clone()))
            .collect()
    }
}

/// One-shot failure switches for testing error paths
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) fail_prepare: AtomicBool,
    pub(crate) fail_commit: AtomicBool,
}

impl Faults {
    /// Consume a pending failure, returning whether it was armed
    pub(crate) fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

/// Shared in-memory quad store
///
/// Cloning a `MemoryStore` yields another handle to the same data.
/// Each client obtains its own `MemoryConnection` through `connection()`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) data: Arc<RwLock<StoreData>>,
    pub(crate) faults: Arc<Faults>,
    pub(crate) version: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this store
    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection::new(self.clone())
    }

    /// Seed a statement directly, outside any transaction
    ///
    /// Counts as one commit for versioning purposes.
    pub fn insert(&self, statement: Statement) {
        self.data.write().statements.add(statement);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Check if a committed statement is present
    pub fn contains(&self, statement: &Statement) -> bool {
        self.data.read().statements.contains(statement)
    }

    /// Committed statements selected by a pattern
    pub fn statements(&self, pattern: &StatementPattern) -> Vec<Statement> {
        self.data.read().statements(pattern)
    }

    /// Number of committed statements
    pub fn len(&self) -> usize {
        self.data.read().statements.len()
    }

    /// Check if the store holds no statement
    pub fn is_empty(&self) -> bool {
        self.data.read().statements.is_empty()
    }

    /// Committed namespace bindings
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.data.read().namespaces()
    }

    /// Number of native commits applied so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Make the next native `prepare()` on any connection fail
    pub fn inject_prepare_failure(&self) {
        self.faults.fail_prepare.store(true, Ordering::SeqCst);
    }

    /// Make the next native `commit()` on any connection fail
    pub fn inject_commit_failure(&self) {
        self.faults.fail_commit.store(true, Ordering::SeqCst);
    }

    /// Take a consistent copy of the current contents
    pub(crate) fn snapshot(&self) -> StoreData {
        self.data.read().clone()
    }
}
