//! Ordered statement sets
//!
//! `Model` is the delta model used by the transaction layer for pending
//! additions and removals, and by the in-memory store for its contents.
//! Iteration order is the statement order, so flushes and listings are
//! deterministic.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::statement::{Statement, StatementPattern};
use crate::term::Term;
use crate::traits::StatementSource;

/// An ordered set of statements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    statements: BTreeSet<Statement>,
}

impl Model {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a statement, returning `true` if it was not present
    pub fn add(&mut self, statement: Statement) -> bool {
        self.statements.insert(statement)
    }

    /// Remove a statement, returning `true` if it was present
    pub fn remove(&mut self, statement: &Statement) -> bool {
        self.statements.remove(statement)
    }

    /// Check if a statement is present
    pub fn contains(&self, statement: &Statement) -> bool {
        self.statements.contains(statement)
    }

    /// Iterate over the statements selected by a pattern
    pub fn filter<'a>(
        &'a self,
        pattern: &'a StatementPattern,
    ) -> impl Iterator<Item = &'a Statement> + 'a {
        self.statements.iter().filter(move |st| pattern.matches(st))
    }

    /// Check if any statement is selected by a pattern
    pub fn any_match(&self, pattern: &StatementPattern) -> bool {
        self.filter(pattern).next().is_some()
    }

    /// Remove and return every statement selected by a pattern
    pub fn remove_matching(&mut self, pattern: &StatementPattern) -> Vec<Statement> {
        let matched: Vec<Statement> = self.filter(pattern).cloned().collect();
        for st in &matched {
            self.statements.remove(st);
        }
        matched
    }

    /// Iterate over all statements in order
    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    /// Number of statements
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if the model is empty
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Remove every statement
    pub fn clear(&mut self) {
        self.statements.clear();
    }

    /// Distinct contexts of the statements in this model
    pub fn contexts(&self) -> BTreeSet<Option<Term>> {
        self.statements.iter().map(|st| st.context.clone()).collect()
    }

    /// Distinct named graphs of the statements in this model
    pub fn named_contexts(&self) -> BTreeSet<Term> {
        self.statements
            .iter()
            .filter_map(|st| st.context.clone())
            .collect()
    }
}

impl StatementSource for Model {
    fn statements(&self, pattern: &StatementPattern, _include_inferred: bool) -> Result<Vec<Statement>> {
        Ok(self.filter(pattern).cloned().collect())
    }
}

impl FromIterator<Statement> for Model {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        Self {
            statements: iter.into_iter().collect(),
        }
    }
}

impl Extend<Statement> for Model {
    fn extend<I: IntoIterator<Item = Statement>>(&mut self, iter: I) {
        self.statements.extend(iter);
    }
}

impl IntoIterator for Model {
    type Item = Statement;
    type IntoIter = std::collections::btree_set::IntoIter<Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Model {
    type Item = &'a Statement;
    type IntoIter = std::collections::btree_set::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}
