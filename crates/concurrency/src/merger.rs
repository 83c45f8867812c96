//! Overlay view and delta merging
//!
//! `OverlaySource` presents a store connection combined with the staged
//! Operations of a transaction:
//!
//! ```text
//! view(pattern) = (store(pattern) - ∪ pending_removes) ∪ (∪ pending_adds ∩ pattern)
//! ```
//!
//! `DeltaMerger` is the seam for query evaluation while deltas are staged.
//! The stock `OverlayMerger` evaluates the query against `OverlaySource`;
//! a store with its own query planner can rewrite the plan instead.

use trellis_core::{
    evaluate, BindingSet, Dataset, Model, QueryExpr, Result, Statement, StatementPattern,
    StatementSource,
};

use crate::operation::OperationArena;

/// A store seen through a transaction's staged writes
pub struct OverlaySource<'a, S: StatementSource + ?Sized> {
    store: &'a S,
    operations: &'a OperationArena,
}

impl<'a, S: StatementSource + ?Sized> OverlaySource<'a, S> {
    /// Combine a store with staged Operations
    pub fn new(store: &'a S, operations: &'a OperationArena) -> Self {
        Self { store, operations }
    }

    /// Check if any statement of the view matches a pattern
    pub fn any_match(&self, pattern: &StatementPattern) -> Result<bool> {
        Ok(!self.statements(pattern, false)?.is_empty())
    }
}

impl<S: StatementSource + ?Sized> StatementSource for OverlaySource<'_, S> {
    fn statements(&self, pattern: &StatementPattern, include_inferred: bool) -> Result<Vec<Statement>> {
        let mut view: Model = self
            .store
            .statements(pattern, include_inferred)?
            .into_iter()
            .filter(|statement| !self.operations.is_removed(statement))
            .collect();
        view.extend(self.operations.added_matching(pattern));
        Ok(view.into_iter().collect())
    }
}

/// Query evaluation in the presence of staged deltas
pub trait DeltaMerger: Send + Sync {
    /// Evaluate a query so the result equals evaluation over the overlay view
    ///
    /// # Errors
    ///
    /// Returns an error if reading the store fails.
    fn evaluate(
        &self,
        store: &dyn StatementSource,
        operations: &OperationArena,
        query: &QueryExpr,
        dataset: &Dataset,
        bindings: &BindingSet,
        include_inferred: bool,
    ) -> Result<Vec<BindingSet>>;
}

/// Evaluates queries directly over `OverlaySource`
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayMerger;

impl DeltaMerger for OverlayMerger {
    fn evaluate(
        &self,
        store: &dyn StatementSource,
        operations: &OperationArena,
        query: &QueryExpr,
        dataset: &Dataset,
        bindings: &BindingSet,
        include_inferred: bool,
    ) -> Result<Vec<BindingSet>> {
        let view = OverlaySource::new(store, operations);
        evaluate(&view, query, dataset, bindings, include_inferred)
    }
}
