//! OptimisticConnection: the per-connection transaction state machine
//!
//! A connection wraps one exclusively owned `StoreConnection` and runs one
//! transaction at a time:
//!
//! ```text
//! Inactive --begin--> Active --prepare--> Prepared --commit--> Inactive
//!                        |                    |
//!                        +------rollback------+-----> Inactive
//! ```
//!
//! Two write modes exist. With read-snapshot enabled (the default) writes
//! are staged in Operations and the connection takes no lock until commit.
//! Without it, `begin()` takes the coordinator's exclusive lock and starts
//! the native transaction, and every write goes straight to the store.
//!
//! # Locking
//!
//! Each connection has two guarded bundles: the transaction state and the
//! ledger. They are always taken in the order state, commit gate, ledger.
//! A concurrent `changed()` from another connection's commit takes only the
//! ledger, so it never waits behind store I/O done under the state lock.
//!
//! # Termination
//!
//! Every failed `begin()`, `prepare()` or `commit()` has already run the
//! termination path before the error is returned: the transaction is never
//! left Active after such an error, and its coordinator slot is released.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use trellis_core::{
    BindingSet, Dataset, Model, Namespace, QueryExpr, Statement, StatementPattern,
    StatementSource, StoreConnection, Term,
};

use crate::config::{IsolationLevel, RetryConfig, TrellisConfig};
use crate::coordinator::{
    ChangeSet, ConnectionId, Coordinator, ExclusiveGuard, TransactionParticipant,
};
use crate::error::{TxnError, TxnResult};
use crate::fingerprint::EvaluateOperation;
use crate::ledger::Ledger;
use crate::listener::ConnectionListener;
use crate::merger::{DeltaMerger, OverlayMerger, OverlaySource};
use crate::operation::{OperationArena, OperationKind};
use crate::overlay::{ContextOverlay, NamespaceOverlay};

/// Summary of what a transaction has staged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingChanges {
    /// Number of Operations created
    pub operations: usize,
    /// Statements pending addition
    pub adds: usize,
    /// Statements pending removal
    pub removes: usize,
}

impl PendingChanges {
    /// Check if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.removes == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Isolation {
    read_snapshot: bool,
    snapshot: bool,
    serializable: bool,
}

impl From<IsolationLevel> for Isolation {
    fn from(level: IsolationLevel) -> Self {
        Self {
            read_snapshot: level.read_snapshot(),
            snapshot: level.snapshot(),
            serializable: level.serializable(),
        }
    }
}

impl Isolation {
    fn level(self) -> IsolationLevel {
        if !self.read_snapshot {
            IsolationLevel::WriteThrough
        } else if self.serializable {
            IsolationLevel::Serializable
        } else if self.snapshot {
            IsolationLevel::Snapshot
        } else {
            IsolationLevel::ReadSnapshot
        }
    }
}

/// Net statements changed in the store by this transaction
#[derive(Debug, Default)]
struct NetChanges {
    added: Model,
    removed: Model,
}

impl NetChanges {
    fn record_add(&mut self, statement: Statement) {
        if !self.removed.remove(&statement) {
            self.added.add(statement);
        }
    }

    fn record_remove(&mut self, statement: Statement) {
        if !self.added.remove(&statement) {
            self.removed.add(statement);
        }
    }

    fn take(&mut self) -> (Model, Model) {
        (
            std::mem::take(&mut self.added),
            std::mem::take(&mut self.removed),
        )
    }

    fn clear(&mut self) {
        self.added.clear();
        self.removed.clear();
    }
}

struct TxnState<C> {
    store: C,
    isolation: Isolation,
    active: bool,
    native: bool,
    prepared: bool,
    exclusive: Option<ExclusiveGuard>,
    operations: OperationArena,
    contexts: ContextOverlay,
    namespaces: NamespaceOverlay,
    net: NetChanges,
    listeners: Vec<Arc<dyn ConnectionListener>>,
}

impl<C> TxnState<C> {
    /// Writes need a running transaction that has not been prepared yet
    fn check_writable(&self) -> TxnResult<()> {
        if !self.active {
            Err(TxnError::NotActive)
        } else if self.prepared {
            Err(TxnError::Prepared)
        } else {
            Ok(())
        }
    }

    fn write_through(&self) -> bool {
        self.active && !self.isolation.read_snapshot
    }

    fn pending(&self) -> PendingChanges {
        let (adds, removes) = self.operations.counts();
        PendingChanges {
            operations: self.operations.len(),
            adds,
            removes,
        }
    }

    fn reset(&mut self) {
        self.active = false;
        self.native = false;
        self.prepared = false;
        self.exclusive = None;
        self.operations.clear();
        self.contexts.clear();
        self.namespaces = NamespaceOverlay::default();
        self.net.clear();
    }
}

struct Shared<C> {
    id: ConnectionId,
    state: Mutex<TxnState<C>>,
    ledger: Mutex<Ledger>,
    tracking: AtomicBool,
    coordinator: Arc<dyn Coordinator>,
}

impl<C: StoreConnection> TransactionParticipant for Shared<C> {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn tracks_reads(&self) -> bool {
        self.tracking.load(Ordering::Acquire)
    }

    fn changed(&self, change: &Arc<ChangeSet>) {
        if !self.tracks_reads() {
            return;
        }
        let coordinator = &self.coordinator;
        let recorded = self
            .ledger
            .lock()
            .changed(change, |delta, read| coordinator.effects(delta, read));
        if recorded {
            debug!(
                target: "trellis::txn",
                connection = %self.id,
                committer = %change.source,
                "Concurrent commit overlaps a tracked read"
            );
        }
    }
}

/// Transactional connection with optimistic isolation
///
/// # Thread Safety
///
/// All methods take `&self`; the connection may be shared between threads,
/// though a transaction is meant to be driven from one thread at a time.
pub struct OptimisticConnection<C: StoreConnection + 'static> {
    shared: Arc<Shared<C>>,
    merger: Arc<dyn DeltaMerger>,
    lock_timeout: Option<Duration>,
}

impl<C: StoreConnection + 'static> OptimisticConnection<C> {
    /// Wrap a store connection with snapshot isolation
    pub fn new(store: C, coordinator: Arc<dyn Coordinator>) -> Self {
        Self::with_isolation(store, coordinator, IsolationLevel::Snapshot)
    }

    /// Wrap a store connection with the given isolation
    pub fn with_isolation(store: C, coordinator: Arc<dyn Coordinator>, level: IsolationLevel) -> Self {
        let state = TxnState {
            store,
            isolation: level.into(),
            active: false,
            native: false,
            prepared: false,
            exclusive: None,
            operations: OperationArena::new(),
            contexts: ContextOverlay::default(),
            namespaces: NamespaceOverlay::default(),
            net: NetChanges::default(),
            listeners: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                id: ConnectionId::new(),
                state: Mutex::new(state),
                ledger: Mutex::new(Ledger::new()),
                tracking: AtomicBool::new(false),
                coordinator,
            }),
            merger: Arc::new(OverlayMerger),
            lock_timeout: None,
        }
    }

    /// Wrap a store connection using a loaded configuration
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Config` if the configured isolation is unknown.
    pub fn with_config(
        store: C,
        coordinator: Arc<dyn Coordinator>,
        config: &TrellisConfig,
    ) -> TxnResult<Self> {
        let level = config.isolation_level()?;
        Ok(Self::with_isolation(store, coordinator, level).with_lock_timeout(config.lock_timeout()))
    }

    /// Use a custom query merger for `evaluate()` while deltas are staged
    pub fn with_merger(mut self, merger: Arc<dyn DeltaMerger>) -> Self {
        self.merger = merger;
        self
    }

    /// Bound the wait for the exclusive lock
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Identity of this connection
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    fn coordinator(&self) -> &dyn Coordinator {
        self.shared.coordinator.as_ref()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a transaction
    ///
    /// In write-through mode this blocks until the exclusive lock is granted
    /// (or the configured timeout expires).
    ///
    /// # Errors
    ///
    /// - `TxnError::AlreadyActive` if a transaction is running
    /// - `TxnError::LockTimeout` if the exclusive lock was not granted
    /// - `TxnError::Storage` if the native transaction could not start
    pub fn begin(&self) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        if state.active {
            return Err(TxnError::AlreadyActive);
        }

        state.reset();
        self.shared.ledger.lock().clear();
        state.active = true;
        self.shared
            .tracking
            .store(state.isolation.snapshot, Ordering::Release);

        let strong: Arc<dyn TransactionParticipant> = self.shared.clone();
        let participant: Weak<dyn TransactionParticipant> = Arc::downgrade(&strong);
        self.coordinator().begin(self.shared.id, participant);

        if !state.isolation.read_snapshot {
            if let Err(e) = self.start_write_through(&mut state) {
                warn!(target: "trellis::txn", connection = %self.shared.id, error = %e, "Begin failed");
                self.end(&mut state, false);
                return Err(e);
            }
        }

        debug!(
            target: "trellis::txn",
            connection = %self.shared.id,
            isolation = state.isolation.level().as_str(),
            "Transaction started"
        );
        Ok(())
    }

    fn start_write_through(&self, state: &mut TxnState<C>) -> TxnResult<()> {
        state.exclusive = Some(self.coordinator().exclusive(self.shared.id, self.lock_timeout)?);
        state.store.begin()?;
        state.native = true;
        Ok(())
    }

    /// Check the ledger, flush staged writes and prepare the store
    ///
    /// Does nothing if no transaction is running or it is already prepared.
    /// On success the commit gate stays held until `commit()` or
    /// `rollback()`.
    ///
    /// # Errors
    ///
    /// - `TxnError::Conflict` (serializable) or `TxnError::Phantom`
    ///   (snapshot) if a concurrent commit invalidated a read
    /// - `TxnError::Storage` if flushing or the native prepare failed
    ///
    /// The transaction has ended when an error is returned.
    pub fn prepare(&self) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        self.prepare_locked(&mut state)
    }

    fn prepare_locked(&self, state: &mut TxnState<C>) -> TxnResult<()> {
        if !state.active || state.prepared {
            return Ok(());
        }
        match self.try_prepare(state) {
            Ok(()) => {
                state.prepared = true;
                Ok(())
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!(target: "trellis::txn", connection = %self.shared.id, error = %e, "Transaction aborted by conflict");
                } else {
                    warn!(target: "trellis::txn", connection = %self.shared.id, error = %e, "Prepare failed");
                }
                self.end(state, false);
                Err(e)
            }
        }
    }

    fn try_prepare(&self, state: &mut TxnState<C>) -> TxnResult<()> {
        if state.exclusive.is_none() {
            state.exclusive = Some(self.coordinator().prepare(self.shared.id, self.lock_timeout)?);
        }
        self.check_ledger(state.isolation)?;

        if !state.native {
            state.store.begin()?;
            state.native = true;
        }
        let TxnState {
            store,
            operations,
            namespaces,
            net,
            ..
        } = &mut *state;
        flush(store, operations, namespaces, net)?;
        state.store.prepare()?;
        Ok(())
    }

    fn check_ledger(&self, isolation: Isolation) -> TxnResult<()> {
        let ledger = self.shared.ledger.lock();
        if isolation.serializable {
            if let Some(conflict) = ledger.first_conflict() {
                return Err(TxnError::Conflict(conflict.clone()));
            }
        } else if isolation.snapshot {
            let coordinator = self.coordinator();
            if let Some(phantom) = ledger.find_phantom(|delta, read| coordinator.effects(delta, read)) {
                return Err(phantom);
            }
        }
        Ok(())
    }

    /// Commit the running transaction
    ///
    /// Does nothing if no transaction is running. On success every other
    /// active tracking connection has been notified before this returns.
    ///
    /// # Errors
    ///
    /// Any error of `prepare()`, or `TxnError::Storage` if the native commit
    /// failed. The transaction has ended when an error is returned.
    pub fn commit(&self) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        if !state.active {
            return Ok(());
        }
        self.prepare_locked(&mut state)?;

        if let Err(e) = state.store.commit() {
            warn!(target: "trellis::txn", connection = %self.shared.id, error = %e, "Native commit failed");
            self.end(&mut state, false);
            return Err(e.into());
        }

        let added = state.net.added.len();
        let removed = state.net.removed.len();
        self.end(&mut state, true);
        info!(target: "trellis::txn", connection = %self.shared.id, added, removed, "Transaction committed");
        Ok(())
    }

    /// Abandon the running transaction
    ///
    /// Discards staged writes and the ledger. Listener notifications already
    /// delivered are not retracted.
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the native rollback failed; the
    /// transaction has ended regardless.
    pub fn rollback(&self) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        if !state.active {
            return Ok(());
        }
        let result = if state.store.is_active() {
            state.store.rollback().map_err(TxnError::from)
        } else {
            Ok(())
        };
        let pending = state.pending();
        self.end(&mut state, false);
        debug!(
            target: "trellis::txn",
            connection = %self.shared.id,
            discarded_adds = pending.adds,
            discarded_removes = pending.removes,
            "Transaction rolled back"
        );
        result
    }

    /// Termination path shared by every outcome; idempotent
    fn end(&self, state: &mut TxnState<C>, success: bool) {
        if !state.active {
            return;
        }
        if !success && state.store.is_active() {
            if let Err(e) = state.store.rollback() {
                warn!(target: "trellis::txn", connection = %self.shared.id, error = %e, "Native rollback failed");
            }
        }
        self.shared.tracking.store(false, Ordering::Release);

        if success {
            // Published while the commit gate is still held
            let (added, removed) = if self.coordinator().is_listener_present() {
                state.net.take()
            } else {
                (Model::new(), Model::new())
            };
            self.coordinator()
                .end_and_notify(self.shared.id, ChangeSet::new(self.shared.id, added, removed));
        }

        state.reset();
        self.shared.ledger.lock().clear();
        self.coordinator().end(self.shared.id);
        trace!(target: "trellis::txn", connection = %self.shared.id, success, "Transaction ended");
    }

    /// Run `f` inside a transaction, committing on success
    ///
    /// Rolls back if `f` fails.
    ///
    /// # Errors
    ///
    /// Returns the error of `begin()`, `f` or `commit()`.
    pub fn transaction<F, T>(&self, f: F) -> TxnResult<T>
    where
        F: FnOnce(&Self) -> TxnResult<T>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(target: "trellis::txn", connection = %self.shared.id, error = %rollback_err, "Rollback after failed closure failed");
                }
                Err(e)
            }
        }
    }

    /// Run `f` inside a transaction, retrying on conflict
    ///
    /// Sleeps with exponential backoff between attempts. Non-conflict errors
    /// are returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the last conflict once retries are exhausted, or the first
    /// non-conflict error.
    pub fn transaction_with_retry<F, T>(&self, retry: &RetryConfig, f: F) -> TxnResult<T>
    where
        F: Fn(&Self) -> TxnResult<T>,
    {
        let mut attempt = 0;
        loop {
            match self.transaction(&f) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_conflict() && attempt < retry.max_retries => {
                    debug!(target: "trellis::txn", connection = %self.shared.id, attempt, error = %e, "Retrying after conflict");
                    std::thread::sleep(retry.backoff(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Add a statement to each of `contexts` (default graph if empty)
    ///
    /// # Errors
    ///
    /// - `TxnError::NotActive` outside a transaction
    /// - `TxnError::Prepared` once `prepare()` has succeeded
    /// - `TxnError::InvalidStatement` for a literal subject or a non-IRI predicate
    /// - `TxnError::Storage` if a write-through add failed
    pub fn add(&self, subject: Term, predicate: Term, object: Term, contexts: &[Option<Term>]) -> TxnResult<()> {
        self.add_in(&OperationKind::Explicit, subject, predicate, object, contexts)
    }

    /// Add a single statement
    ///
    /// # Errors
    ///
    /// As `add()`.
    pub fn add_statement(&self, statement: Statement) -> TxnResult<()> {
        let Statement {
            subject,
            predicate,
            object,
            context,
        } = statement;
        self.add(subject, predicate, object, &[context])
    }

    /// Add statements on behalf of an Operation
    ///
    /// # Errors
    ///
    /// As `add()`.
    pub fn add_in(
        &self,
        op: &OperationKind,
        subject: Term,
        predicate: Term,
        object: Term,
        contexts: &[Option<Term>],
    ) -> TxnResult<()> {
        if !subject.is_resource() {
            return Err(TxnError::InvalidStatement(format!("subject {} is a literal", subject)));
        }
        if !predicate.is_iri() {
            return Err(TxnError::InvalidStatement(format!("predicate {} is not an IRI", predicate)));
        }
        let statements: Vec<Statement> = if contexts.is_empty() {
            vec![Statement::new(subject, predicate, object)]
        } else {
            contexts
                .iter()
                .map(|ctx| Statement::with_context(subject.clone(), predicate.clone(), object.clone(), ctx.clone()))
                .collect()
        };

        let mut state = self.shared.state.lock();
        state.check_writable()?;
        for statement in statements {
            if state.write_through() {
                if !contains(&state.store, &statement)? {
                    state.store.add_statement(&statement)?;
                    state.net.record_add(statement.clone());
                }
            } else {
                let id = state.operations.id_for(op);
                state.contexts.note_add(&statement.context);
                state.operations.stage_add(id, statement.clone());
            }
            for listener in &state.listeners {
                listener.statement_added(&statement);
            }
            trace!(target: "trellis::txn", connection = %self.shared.id, %statement, "Add");
        }
        Ok(())
    }

    /// Remove statements matching the given positions (`None` = wildcard)
    ///
    /// Empty `contexts` means every graph. Returns the number of statements
    /// removed from the transaction's view.
    ///
    /// # Errors
    ///
    /// - `TxnError::NotActive` outside a transaction
    /// - `TxnError::Prepared` once `prepare()` has succeeded
    /// - `TxnError::Storage` if reading or a write-through remove failed
    pub fn remove(
        &self,
        subject: Option<Term>,
        predicate: Option<Term>,
        object: Option<Term>,
        contexts: &[Option<Term>],
    ) -> TxnResult<usize> {
        let pattern = StatementPattern::new(subject, predicate, object).in_contexts(contexts);
        self.remove_in(&OperationKind::Explicit, &pattern)
    }

    /// Remove one exact statement
    ///
    /// # Errors
    ///
    /// As `remove()`.
    pub fn remove_statement(&self, statement: &Statement) -> TxnResult<usize> {
        self.remove_in(&OperationKind::Explicit, &StatementPattern::exact(statement))
    }

    /// Remove every statement of the given contexts (all graphs if empty)
    ///
    /// # Errors
    ///
    /// As `remove()`.
    pub fn clear(&self, contexts: &[Option<Term>]) -> TxnResult<usize> {
        self.remove(None, None, None, contexts)
    }

    /// Remove statements matching a pattern on behalf of an Operation
    ///
    /// The pattern is resolved against the transaction's current view, as a
    /// tracked read; each match is staged (or written through) individually.
    ///
    /// # Errors
    ///
    /// As `remove()`.
    pub fn remove_in(&self, op: &OperationKind, pattern: &StatementPattern) -> TxnResult<usize> {
        let mut state = self.shared.state.lock();
        state.check_writable()?;
        let matched = self.tracked(
            &state,
            || EvaluateOperation::pattern(pattern.clone(), false),
            |state| OverlaySource::new(&state.store, &state.operations).statements(pattern, false),
        )?;
        for statement in &matched {
            if state.write_through() {
                if state.store.remove_statement(statement)? {
                    state.net.record_remove(statement.clone());
                }
            } else {
                let id = state.operations.id_for(op);
                state.contexts.note_remove(&statement.context);
                state.operations.stage_remove(id, statement.clone());
            }
            for listener in &state.listeners {
                listener.statement_removed(statement);
            }
        }
        trace!(target: "trellis::txn", connection = %self.shared.id, %pattern, removed = matched.len(), "Remove");
        Ok(matched.len())
    }

    /// Bind a namespace prefix
    ///
    /// # Errors
    ///
    /// `TxnError::NotActive` outside a transaction, `TxnError::Prepared`
    /// after `prepare()`, or a write-through failure.
    pub fn set_namespace(&self, prefix: &str, name: &str) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        state.check_writable()?;
        if state.write_through() {
            state.store.set_namespace(prefix, name)?;
        } else {
            state.namespaces.set(prefix, name);
        }
        Ok(())
    }

    /// Remove a namespace prefix binding
    ///
    /// # Errors
    ///
    /// As `set_namespace()`.
    pub fn remove_namespace(&self, prefix: &str) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        state.check_writable()?;
        if state.write_through() {
            state.store.remove_namespace(prefix)?;
        } else {
            state.namespaces.remove(prefix);
        }
        Ok(())
    }

    /// Remove every namespace binding
    ///
    /// # Errors
    ///
    /// As `set_namespace()`.
    pub fn clear_namespaces(&self) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        state.check_writable()?;
        if state.write_through() {
            state.store.clear_namespaces()?;
        } else {
            state.namespaces.clear();
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Run a read against the transaction's view and track it
    ///
    /// While active, the store read and the fingerprint registration happen
    /// under the shared commit gate (or the exclusive lock this connection
    /// already holds), so a read is totally ordered with concurrent commits.
    fn read<T, R, F>(&self, fingerprint: R, f: F) -> TxnResult<T>
    where
        R: FnOnce() -> EvaluateOperation,
        F: FnOnce(&TxnState<C>) -> trellis_core::Result<T>,
    {
        let state = self.shared.state.lock();
        if !state.active {
            return Ok(f(&*state)?);
        }
        self.tracked(&state, fingerprint, f)
    }

    /// Body of a read inside an active transaction
    fn tracked<T, R, F>(&self, state: &TxnState<C>, fingerprint: R, f: F) -> TxnResult<T>
    where
        R: FnOnce() -> EvaluateOperation,
        F: FnOnce(&TxnState<C>) -> trellis_core::Result<T>,
    {
        let _gate = state.exclusive.is_none().then(|| self.coordinator().read_lock());
        let result = f(state)?;
        if state.isolation.snapshot {
            self.shared.ledger.lock().observe(fingerprint());
        }
        Ok(result)
    }

    /// Statements selected by a pattern
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the store read failed.
    pub fn get_statements(&self, pattern: &StatementPattern, include_inferred: bool) -> TxnResult<Vec<Statement>> {
        self.read(
            || EvaluateOperation::pattern(pattern.clone(), include_inferred),
            |state| OverlaySource::new(&state.store, &state.operations).statements(pattern, include_inferred),
        )
    }

    /// Check if any statement matches a pattern
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the store read failed.
    pub fn has_statement(&self, pattern: &StatementPattern, include_inferred: bool) -> TxnResult<bool> {
        self.read(
            || EvaluateOperation::pattern(pattern.clone(), include_inferred),
            |state| {
                let view = OverlaySource::new(&state.store, &state.operations);
                Ok(!view.statements(pattern, include_inferred)?.is_empty())
            },
        )
    }

    /// Evaluate a basic graph pattern query
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the store read failed.
    pub fn evaluate(
        &self,
        query: &QueryExpr,
        dataset: &Dataset,
        bindings: &BindingSet,
        include_inferred: bool,
    ) -> TxnResult<Vec<BindingSet>> {
        self.read(
            || EvaluateOperation::query(query.clone(), dataset.clone(), bindings.clone(), include_inferred),
            |state| {
                if state.operations.has_changes() {
                    self.merger
                        .evaluate(&state.store, &state.operations, query, dataset, bindings, include_inferred)
                } else {
                    state.store.evaluate(query, dataset, bindings, include_inferred)
                }
            },
        )
    }

    /// Number of statements in the given contexts (all graphs if empty)
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the store read failed.
    pub fn size(&self, contexts: &[Option<Term>]) -> TxnResult<usize> {
        self.read(
            || EvaluateOperation::contents(contexts),
            |state| {
                let view = OverlaySource::new(&state.store, &state.operations);
                Ok(view
                    .statements(&StatementPattern::any().in_contexts(contexts), false)?
                    .len())
            },
        )
    }

    /// Named graphs holding at least one statement
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the store read failed.
    pub fn context_ids(&self) -> TxnResult<Vec<Term>> {
        self.read(
            || EvaluateOperation::contents(&[]),
            |state| {
                let view = OverlaySource::new(&state.store, &state.operations);
                let underlying = state.store.context_ids()?;
                state.contexts.resolve(underlying, |ctx| {
                    view.any_match(&StatementPattern::any().in_contexts(&[Some(ctx.clone())]))
                })
            },
        )
    }

    /// Effective namespace bindings, ordered by prefix
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the store read failed.
    pub fn namespaces(&self) -> TxnResult<Vec<Namespace>> {
        let state = self.shared.state.lock();
        let underlying = state.store.namespaces()?;
        Ok(state.namespaces.view(underlying))
    }

    /// Effective binding of one prefix
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Storage` if the store read failed.
    pub fn namespace(&self, prefix: &str) -> TxnResult<Option<String>> {
        let state = self.shared.state.lock();
        Ok(state.namespaces.get(prefix, |p| state.store.namespace(p))?)
    }

    // ========================================================================
    // Isolation
    // ========================================================================

    /// Choose between staged writes (`true`) and write-through (`false`)
    ///
    /// Disabling read-snapshot inside a transaction switches it to
    /// write-through: the exclusive lock is taken, the native transaction
    /// started and everything staged so far flushed into it.
    ///
    /// # Errors
    ///
    /// - `TxnError::IsolationLocked` when enabling it inside a write-through
    ///   transaction, or switching a prepared one
    /// - `TxnError::LockTimeout` or `TxnError::Storage` if the switch failed;
    ///   the transaction then continues unchanged
    pub fn set_read_snapshot(&self, read_snapshot: bool) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        if !state.active {
            state.isolation.read_snapshot = read_snapshot;
            return Ok(());
        }
        match (state.isolation.read_snapshot, read_snapshot) {
            (true, false) => self.switch_to_write_through(&mut state),
            (false, true) => Err(TxnError::IsolationLocked(
                "cannot stage writes in a write-through transaction".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn switch_to_write_through(&self, state: &mut TxnState<C>) -> TxnResult<()> {
        if state.prepared {
            return Err(TxnError::IsolationLocked("transaction is prepared".to_string()));
        }
        let guard = self.coordinator().exclusive(self.shared.id, self.lock_timeout)?;
        state.store.begin()?;

        let TxnState {
            store,
            operations,
            namespaces,
            net,
            ..
        } = &mut *state;
        if let Err(e) = flush(store, operations, namespaces, net) {
            if let Err(rollback_err) = state.store.rollback() {
                warn!(target: "trellis::txn", connection = %self.shared.id, error = %rollback_err, "Native rollback failed");
            }
            state.net.clear();
            return Err(e.into());
        }

        state.native = true;
        state.exclusive = Some(guard);
        state.operations.clear();
        state.contexts.clear();
        state.namespaces = NamespaceOverlay::default();
        state.isolation.read_snapshot = false;
        info!(target: "trellis::txn", connection = %self.shared.id, "Transaction switched to write-through");
        Ok(())
    }

    /// Enable or disable read tracking
    ///
    /// Disabling also disables serializable.
    ///
    /// # Errors
    ///
    /// `TxnError::IsolationLocked` when changing it inside a transaction.
    pub fn set_snapshot(&self, snapshot: bool) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        if state.active && state.isolation.snapshot != snapshot {
            return Err(TxnError::IsolationLocked(
                "snapshot tracking is fixed while a transaction runs".to_string(),
            ));
        }
        state.isolation.snapshot = snapshot;
        if !snapshot {
            state.isolation.serializable = false;
        }
        Ok(())
    }

    /// Enable or disable serializable isolation
    ///
    /// Enabling also enables snapshot tracking.
    ///
    /// # Errors
    ///
    /// `TxnError::IsolationLocked` when changing it inside a transaction.
    pub fn set_serializable(&self, serializable: bool) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        if state.active && state.isolation.serializable != serializable {
            return Err(TxnError::IsolationLocked(
                "serializable is fixed while a transaction runs".to_string(),
            ));
        }
        state.isolation.serializable = serializable;
        if serializable {
            state.isolation.snapshot = true;
        }
        Ok(())
    }

    /// Set every isolation flag from a level
    ///
    /// # Errors
    ///
    /// `TxnError::IsolationLocked` when changing it inside a transaction.
    pub fn set_isolation(&self, level: IsolationLevel) -> TxnResult<()> {
        let mut state = self.shared.state.lock();
        if state.active && state.isolation.level() != level {
            return Err(TxnError::IsolationLocked(format!(
                "cannot switch to {} while a transaction runs",
                level.as_str()
            )));
        }
        state.isolation = level.into();
        Ok(())
    }

    /// Check if writes are staged rather than written through
    pub fn is_read_snapshot(&self) -> bool {
        self.shared.state.lock().isolation.read_snapshot
    }

    /// Check if reads are tracked
    pub fn is_snapshot(&self) -> bool {
        self.shared.state.lock().isolation.snapshot
    }

    /// Check if any detected overlap aborts the commit
    pub fn is_serializable(&self) -> bool {
        self.shared.state.lock().isolation.serializable
    }

    /// Current isolation as a level
    pub fn isolation(&self) -> IsolationLevel {
        self.shared.state.lock().isolation.level()
    }

    // ========================================================================
    // Inspection and listeners
    // ========================================================================

    /// Check if a transaction is running
    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active
    }

    /// What the running transaction has staged
    pub fn pending(&self) -> PendingChanges {
        self.shared.state.lock().pending()
    }

    /// Number of concurrent commits recorded against this transaction's reads
    pub fn inconsistency_count(&self) -> usize {
        self.shared.ledger.lock().len()
    }

    /// Register a listener for staged writes
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.shared.state.lock().listeners.push(listener);
    }

    /// Unregister a listener, returning whether it was registered
    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        let mut state = self.shared.state.lock();
        let before = state.listeners.len();
        state
            .listeners
            .retain(|l| Arc::as_ptr(l) as *const () != Arc::as_ptr(listener) as *const ());
        state.listeners.len() != before
    }
}

impl<C: StoreConnection + 'static> fmt::Debug for OptimisticConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticConnection")
            .field("id", &self.shared.id)
            .field("tracking", &self.shared.tracking.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: StoreConnection + 'static> Drop for OptimisticConnection<C> {
    fn drop(&mut self) {
        if let Err(e) = self.rollback() {
            warn!(target: "trellis::txn", connection = %self.shared.id, error = %e, "Rollback on drop failed");
        }
    }
}

fn contains<S: StatementSource + ?Sized>(store: &S, statement: &Statement) -> trellis_core::Result<bool> {
    Ok(!store
        .statements(&StatementPattern::exact(statement), false)?
        .is_empty())
}

/// Apply staged writes to the native transaction
///
/// Namespaces first, then each Operation in creation order, removals before
/// additions. Only statements that actually change the store are recorded
/// in `net`.
fn flush<C: StoreConnection>(
    store: &mut C,
    operations: &OperationArena,
    namespaces: &NamespaceOverlay,
    net: &mut NetChanges,
) -> trellis_core::Result<()> {
    namespaces.flush(store)?;
    for op in operations.iter() {
        for statement in op.pending_removes() {
            if store.remove_statement(statement)? {
                net.record_remove(statement.clone());
            }
        }
        for statement in op.pending_adds() {
            if !contains(store, statement)? {
                store.add_statement(statement)?;
                net.record_add(statement.clone());
            }
        }
    }
    Ok(())
}
