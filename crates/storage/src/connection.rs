//! MemoryConnection: native transactions over a MemoryStore
//!
//! A native transaction works on a private copy of the store taken at
//! `begin()` and records every write in a journal. Reads inside the
//! transaction are served from the copy, so the connection sees its own
//! writes. `commit()` replays the journal against the shared store under
//! one write lock; `rollback()` drops both.
//!
//! Copying at `begin()` is O(store size). That is acceptable for a
//! reference store used by tests and embedding examples.

use std::sync::atomic::Ordering;

use tracing::{debug, trace};
use trellis_core::{
    Error, Namespace, Result, Statement, StatementPattern, StatementSource, StoreConnection, Term,
};

use crate::memory::{Faults, MemoryStore, StoreData};

/// A write recorded by a native transaction
#[derive(Debug, Clone)]
enum JournalEntry {
    Add(Statement),
    Remove(Statement),
    SetNamespace(String, String),
    RemoveNamespace(String),
    ClearNamespaces,
}

impl JournalEntry {
    fn apply(&self, data: &mut StoreData) {
        match self {
            JournalEntry::Add(st) => {
                data.statements.add(st.clone());
            }
            JournalEntry::Remove(st) => {
                data.statements.remove(st);
            }
            JournalEntry::SetNamespace(prefix, name) => {
                data.namespaces.insert(prefix.clone(), name.clone());
            }
            JournalEntry::RemoveNamespace(prefix) => {
                data.namespaces.remove(prefix);
            }
            JournalEntry::ClearNamespaces => data.namespaces.clear(),
        }
    }
}

#[derive(Debug)]
struct NativeTxn {
    working: StoreData,
    journal: Vec<JournalEntry>,
    prepared: bool,
}

/// Connection to a `MemoryStore`
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
    txn: Option<NativeTxn>,
}

impl MemoryConnection {
    pub(crate) fn new(store: MemoryStore) -> Self {
        Self { store, txn: None }
    }

    /// The store this connection writes to
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Number of writes journaled by the running native transaction
    pub fn journal_len(&self) -> usize {
        self.txn.as_ref().map_or(0, |txn| txn.journal.len())
    }

    fn with_data<T>(&self, f: impl FnOnce(&StoreData) -> T) -> T {
        match &self.txn {
            Some(txn) => f(&txn.working),
            None => f(&self.store.data.read()),
        }
    }

    fn record(&mut self, entry: JournalEntry) -> Result<()> {
        let txn = self.txn.as_mut().ok_or(Error::TransactionNotActive)?;
        if txn.prepared {
            return Err(Error::invalid_operation(
                "cannot write to a prepared native transaction",
            ));
        }
        entry.apply(&mut txn.working);
        txn.journal.push(entry);
        Ok(())
    }
}

impl StatementSource for MemoryConnection {
    fn statements(&self, pattern: &StatementPattern, _include_inferred: bool) -> Result<Vec<Statement>> {
        Ok(self.with_data(|data| data.statements(pattern)))
    }
}

impl StoreConnection for MemoryConnection {
    fn context_ids(&self) -> Result<Vec<Term>> {
        Ok(self.with_data(StoreData::context_ids))
    }

    fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.with_data(StoreData::namespaces))
    }

    fn namespace(&self, prefix: &str) -> Result<Option<String>> {
        Ok(self.with_data(|data| data.namespaces.get(prefix).cloned()))
    }

    fn add_statement(&mut self, statement: &Statement) -> Result<()> {
        if !statement.subject.is_resource() || !statement.predicate.is_iri() {
            return Err(Error::invalid_operation(format!(
                "malformed statement {}",
                statement
            )));
        }
        self.record(JournalEntry::Add(statement.clone()))
    }

    fn remove_statement(&mut self, statement: &Statement) -> Result<bool> {
        let present = self.with_data(|data| data.statements.contains(statement));
        self.record(JournalEntry::Remove(statement.clone()))?;
        Ok(present)
    }

    fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()> {
        self.record(JournalEntry::SetNamespace(prefix.to_string(), name.to_string()))
    }

    fn remove_namespace(&mut self, prefix: &str) -> Result<()> {
        self.record(JournalEntry::RemoveNamespace(prefix.to_string()))
    }

    fn clear_namespaces(&mut self) -> Result<()> {
        self.record(JournalEntry::ClearNamespaces)
    }

    fn begin(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::TransactionAlreadyActive);
        }
        self.txn = Some(NativeTxn {
            working: self.store.snapshot(),
            journal: Vec::new(),
            prepared: false,
        });
        trace!(target: "trellis::store", "Native transaction started");
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let txn = self.txn.as_mut().ok_or(Error::TransactionNotActive)?;
        if Faults::take(&self.store.faults.fail_prepare) {
            return Err(Error::Injected("prepare".to_string()));
        }
        txn.prepared = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let txn = self.txn.take().ok_or(Error::TransactionNotActive)?;
        if Faults::take(&self.store.faults.fail_commit) {
            return Err(Error::Injected("commit".to_string()));
        }

        // Apply the whole journal under one lock so readers never see a partial commit
        let mut data = self.store.data.write();
        for entry in &txn.journal {
            entry.apply(&mut data);
        }
        let version = self.store.version.fetch_add(1, Ordering::SeqCst) + 1;
        drop(data);

        debug!(
            target: "trellis::store",
            writes = txn.journal.len(),
            version,
            "Native transaction committed"
        );
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        match self.txn.take() {
            Some(txn) => {
                trace!(
                    target: "trellis::store",
                    discarded = txn.journal.len(),
                    "Native transaction rolled back"
                );
                Ok(())
            }
            None => Err(Error::TransactionNotActive),
        }
    }

    fn is_active(&self) -> bool {
        self.txn.is_some()
    }
}
