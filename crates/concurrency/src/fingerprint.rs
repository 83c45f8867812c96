//! Read fingerprints
//!
//! An `EvaluateOperation` describes one read made by a transaction: what was
//! selected, over which dataset, with which initial bindings and whether
//! inferred statements were included. It is the unit of conflict detection:
//! the coordinator's `effects()` predicate decides whether a committed delta
//! overlaps a fingerprint.
//!
//! Equality and hashing are structural, so repeating an identical read
//! yields the same fingerprint and the tracker keeps it once.

use std::fmt;

use trellis_core::{BindingSet, Dataset, QueryExpr, StatementPattern, Term};

/// What a read selected
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadExpr {
    /// A single statement pattern (`get_statements`, `size`, `context_ids`)
    Pattern(StatementPattern),
    /// A basic graph pattern query (`evaluate`)
    Query(QueryExpr),
}

/// Fingerprint of a read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvaluateOperation {
    /// Graphs the read was evaluated against
    pub dataset: Dataset,
    /// Pattern or query tree
    pub expr: ReadExpr,
    /// Initial bindings
    pub bindings: BindingSet,
    /// Whether inferred statements were requested
    pub include_inferred: bool,
}

impl EvaluateOperation {
    /// Fingerprint of a statement-pattern read
    pub fn pattern(pattern: StatementPattern, include_inferred: bool) -> Self {
        Self {
            dataset: Dataset::all(),
            expr: ReadExpr::Pattern(pattern),
            bindings: BindingSet::new(),
            include_inferred,
        }
    }

    /// Fingerprint of a query evaluation
    pub fn query(
        query: QueryExpr,
        dataset: Dataset,
        bindings: BindingSet,
        include_inferred: bool,
    ) -> Self {
        Self {
            dataset,
            expr: ReadExpr::Query(query),
            bindings,
            include_inferred,
        }
    }

    /// Fingerprint of a size or graph enumeration over the given contexts
    pub fn contents(contexts: &[Option<Term>]) -> Self {
        Self::pattern(StatementPattern::any().in_contexts(contexts), false)
    }

    /// Statement patterns whose matches this read depends on
    ///
    /// For a query, each triple pattern is resolved against the initial
    /// bindings and restricted to the dataset; unbound variables become
    /// wildcards. This over-approximates the statements the read observed.
    pub fn footprint(&self) -> Vec<StatementPattern> {
        match &self.expr {
            ReadExpr::Pattern(pattern) => vec![pattern.clone()],
            ReadExpr::Query(query) => query
                .patterns
                .iter()
                .map(|triple| triple.to_statement_pattern(&self.bindings, &self.dataset))
                .collect(),
        }
    }
}

impl fmt::Display for EvaluateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expr {
            ReadExpr::Pattern(pattern) => write!(f, "read {}", pattern)?,
            ReadExpr::Query(query) => write!(f, "query {}", query)?,
        }
        if !self.bindings.is_empty() {
            write!(f, " with")?;
            for (name, value) in self.bindings.iter() {
                write!(f, " ?{}={}", name, value)?;
            }
        }
        Ok(())
    }
}
