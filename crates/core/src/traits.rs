//! Core traits for store abstraction
//!
//! This module defines the traits that let the transaction layer run on top
//! of any statement storage engine:
//! - `StatementSource`: anything statements can be selected from
//! - `StoreConnection`: a connection to a mutable store with a native
//!   transaction (begin/prepare/commit/rollback) and raw add/remove

use crate::error::Result;
use crate::namespace::Namespace;
use crate::query::{self, BindingSet, Dataset, QueryExpr};
use crate::statement::{Statement, StatementPattern};
use crate::term::Term;

/// A selectable set of statements
pub trait StatementSource {
    /// Statements selected by a pattern
    ///
    /// `include_inferred` asks the source to include statements it derives;
    /// sources without inference ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn statements(&self, pattern: &StatementPattern, include_inferred: bool) -> Result<Vec<Statement>>;
}

/// Connection to a mutable statement store
///
/// Writes are only valid inside a native transaction. Reads issued while a
/// native transaction is active must see that transaction's own writes.
///
/// A connection is owned by exactly one transaction wrapper at a time and
/// moved between threads with it, hence `Send`.
pub trait StoreConnection: StatementSource + Send {
    /// Evaluate a basic graph pattern against this connection
    fn evaluate(
        &self,
        query: &QueryExpr,
        dataset: &Dataset,
        bindings: &BindingSet,
        include_inferred: bool,
    ) -> Result<Vec<BindingSet>> {
        query::evaluate(self, query, dataset, bindings, include_inferred)
    }

    /// Number of explicit statements in the given contexts (empty = all)
    fn size(&self, contexts: &[Option<Term>]) -> Result<usize> {
        let pattern = StatementPattern::any().in_contexts(contexts);
        Ok(self.statements(&pattern, false)?.len())
    }

    /// Named graphs holding at least one statement
    fn context_ids(&self) -> Result<Vec<Term>>;

    /// All namespace bindings
    fn namespaces(&self) -> Result<Vec<Namespace>>;

    /// Namespace bound to a prefix
    fn namespace(&self, prefix: &str) -> Result<Option<String>>;

    /// Add a statement
    fn add_statement(&mut self, statement: &Statement) -> Result<()>;

    /// Remove a statement, returning whether it was present
    fn remove_statement(&mut self, statement: &Statement) -> Result<bool>;

    /// Bind a prefix to a namespace
    fn set_namespace(&mut self, prefix: &str, name: &str) -> Result<()>;

    /// Remove a prefix binding
    fn remove_namespace(&mut self, prefix: &str) -> Result<()>;

    /// Remove every prefix binding
    fn clear_namespaces(&mut self) -> Result<()>;

    /// Start a native transaction
    fn begin(&mut self) -> Result<()>;

    /// Prepare the native transaction for commit
    fn prepare(&mut self) -> Result<()>;

    /// Commit the native transaction
    fn commit(&mut self) -> Result<()>;

    /// Roll back the native transaction
    fn rollback(&mut self) -> Result<()>;

    /// Check if a native transaction is running
    fn is_active(&self) -> bool;
}
