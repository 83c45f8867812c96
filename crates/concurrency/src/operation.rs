//! Operations: batches of staged writes
//!
//! Every write of a transaction belongs to an Operation. Ungrouped writes
//! share the single explicit Operation; writes issued on behalf of an update
//! expression belong to the Operation of that `UpdateContext`, looked up by
//! structural equality and reused for the rest of the transaction.
//!
//! Operations live in an arena and are addressed by `OperationId`. Each
//! holds a pending-add and a pending-remove delta model.
//!
//! # Invariant
//!
//! A statement is never pending as both an addition and a removal. Staging
//! a statement on one side drops it from the other side of *every*
//! Operation of the transaction, so the overlay view and the flushed result
//! agree regardless of the order Operations are flushed in.

use rustc_hash::FxHashMap;
use trellis_core::{BindingSet, Dataset, Model, Statement, StatementPattern, Term};

/// Identity of a bound update expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateContext {
    /// Update expression text
    pub update: String,
    /// Dataset the update runs against
    pub dataset: Dataset,
    /// Bindings the update was invoked with
    pub bindings: BindingSet,
}

impl UpdateContext {
    /// Create an update context with no dataset restriction or bindings
    pub fn new(update: impl Into<String>) -> Self {
        Self {
            update: update.into(),
            dataset: Dataset::all(),
            bindings: BindingSet::new(),
        }
    }

    /// Attach bindings
    pub fn with_bindings(mut self, bindings: BindingSet) -> Self {
        self.bindings = bindings;
        self
    }
}

/// Which Operation a write belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Ungrouped writes; one per transaction
    Explicit,
    /// Writes issued by an update expression
    Bound(UpdateContext),
}

/// Stable arena index of an Operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(usize);

impl OperationId {
    /// Position in staging order
    pub fn index(self) -> usize {
        self.0
    }
}

/// A batch of staged writes
#[derive(Debug, Clone)]
pub struct Operation {
    kind: OperationKind,
    pending_adds: Model,
    pending_removes: Model,
}

impl Operation {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            pending_adds: Model::new(),
            pending_removes: Model::new(),
        }
    }

    /// What this Operation groups
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Statements to add at flush
    pub fn pending_adds(&self) -> &Model {
        &self.pending_adds
    }

    /// Statements to remove at flush
    pub fn pending_removes(&self) -> &Model {
        &self.pending_removes
    }

    /// Check if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.pending_adds.is_empty() && self.pending_removes.is_empty()
    }
}

/// All Operations of one transaction
#[derive(Debug, Default)]
pub struct OperationArena {
    operations: Vec<Operation>,
    index: FxHashMap<OperationKind, OperationId>,
}

impl OperationArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the Operation for `kind`, creating it on first use
    pub fn id_for(&mut self, kind: &OperationKind) -> OperationId {
        if let Some(id) = self.index.get(kind) {
            return *id;
        }
        let id = OperationId(self.operations.len());
        self.operations.push(Operation::new(kind.clone()));
        self.index.insert(kind.clone(), id);
        id
    }

    /// Operation by id
    pub fn get(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(id.0)
    }

    /// Stage an addition into one Operation
    pub fn stage_add(&mut self, id: OperationId, statement: Statement) {
        for op in &mut self.operations {
            op.pending_removes.remove(&statement);
        }
        if let Some(op) = self.operations.get_mut(id.0) {
            op.pending_adds.add(statement);
        }
    }

    /// Stage a removal into one Operation
    pub fn stage_remove(&mut self, id: OperationId, statement: Statement) {
        for op in &mut self.operations {
            op.pending_adds.remove(&statement);
        }
        if let Some(op) = self.operations.get_mut(id.0) {
            op.pending_removes.add(statement);
        }
    }

    /// Operations in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// Number of Operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if no Operation was created
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Check if any Operation has staged writes
    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| !op.is_empty())
    }

    /// Check if a statement is pending removal in any Operation
    pub fn is_removed(&self, statement: &Statement) -> bool {
        self.operations
            .iter()
            .any(|op| op.pending_removes.contains(statement))
    }

    /// Pending additions of every Operation selected by a pattern
    pub fn added_matching(&self, pattern: &StatementPattern) -> Vec<Statement> {
        self.operations
            .iter()
            .flat_map(|op| op.pending_adds.filter(pattern))
            .cloned()
            .collect()
    }

    /// Check if any pending addition targets a named graph
    pub fn adds_into(&self, context: &Term) -> bool {
        let pattern = StatementPattern::any().in_contexts(&[Some(context.clone())]);
        self.operations
            .iter()
            .any(|op| op.pending_adds.any_match(&pattern))
    }

    /// Union of all pending additions
    pub fn added(&self) -> Model {
        self.operations
            .iter()
            .flat_map(|op| op.pending_adds.iter().cloned())
            .collect()
    }

    /// Union of all pending removals
    pub fn removed(&self) -> Model {
        self.operations
            .iter()
            .flat_map(|op| op.pending_removes.iter().cloned())
            .collect()
    }

    /// Total pending additions and removals
    pub fn counts(&self) -> (usize, usize) {
        self.operations.iter().fold((0, 0), |(adds, removes), op| {
            (adds + op.pending_adds.len(), removes + op.pending_removes.len())
        })
    }

    /// Discard every Operation
    pub fn clear(&mut self) {
        self.operations.clear();
        self.index.clear();
    }
}
