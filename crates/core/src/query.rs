//! Basic graph pattern queries
//!
//! Query parsing and full algebra are out of scope for Trellis. Reads that
//! go beyond a single statement pattern are expressed as a basic graph
//! pattern: a conjunction of triple patterns whose positions are variables
//! or constants. The evaluator here joins the patterns against any
//! `StatementSource`, which lets the transaction layer evaluate the same
//! query against the raw store or against its overlay view.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::statement::{Statement, StatementPattern};
use crate::term::Term;
use crate::traits::StatementSource;

/// One position of a triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternTerm {
    /// Named variable
    Var(String),
    /// Constant term
    Const(Term),
}

impl PatternTerm {
    /// Create a variable
    pub fn var(name: impl Into<String>) -> Self {
        PatternTerm::Var(name.into())
    }

    /// Resolve against a solution: bound variables and constants yield a term
    fn resolve(&self, bindings: &BindingSet) -> Option<Term> {
        match self {
            PatternTerm::Var(name) => bindings.get(name).cloned(),
            PatternTerm::Const(term) => Some(term.clone()),
        }
    }
}

impl From<Term> for PatternTerm {
    fn from(term: Term) -> Self {
        PatternTerm::Const(term)
    }
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternTerm::Var(name) => write!(f, "?{}", name),
            PatternTerm::Const(term) => write!(f, "{}", term),
        }
    }
}

/// A triple pattern of a basic graph pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriplePattern {
    /// Subject position
    pub subject: PatternTerm,
    /// Predicate position
    pub predicate: PatternTerm,
    /// Object position
    pub object: PatternTerm,
}

impl TriplePattern {
    /// Create a triple pattern
    pub fn new(
        subject: impl Into<PatternTerm>,
        predicate: impl Into<PatternTerm>,
        object: impl Into<PatternTerm>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// Statement pattern selecting candidates for this triple under a solution
    pub fn to_statement_pattern(&self, bindings: &BindingSet, dataset: &Dataset) -> StatementPattern {
        StatementPattern::new(
            self.subject.resolve(bindings),
            self.predicate.resolve(bindings),
            self.object.resolve(bindings),
        )
        .in_contexts(&dataset.graphs)
    }

    /// Extend a solution with the variables this statement binds
    ///
    /// Returns `None` when the statement contradicts an existing binding,
    /// including a variable repeated within the same triple.
    fn bind(&self, statement: &Statement, solution: &BindingSet) -> Option<BindingSet> {
        let mut extended = solution.clone();
        for (position, term) in [
            (&self.subject, &statement.subject),
            (&self.predicate, &statement.predicate),
            (&self.object, &statement.object),
        ] {
            match position {
                PatternTerm::Const(expected) if expected != term => return None,
                PatternTerm::Const(_) => {}
                PatternTerm::Var(name) => match extended.get(name) {
                    Some(bound) if bound != term => return None,
                    Some(_) => {}
                    None => extended.insert(name.clone(), term.clone()),
                },
            }
        }
        Some(extended)
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Conjunctive query over triple patterns
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryExpr {
    /// Patterns joined in order
    pub patterns: Vec<TriplePattern>,
}

impl QueryExpr {
    /// Create a query from its patterns
    pub fn new(patterns: Vec<TriplePattern>) -> Self {
        Self { patterns }
    }

    /// Add a pattern to the join
    pub fn and(mut self, pattern: TriplePattern) -> Self {
        self.patterns.push(pattern);
        self
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for pattern in &self.patterns {
            write!(f, "{} . ", pattern)?;
        }
        write!(f, "}}")
    }
}

/// Variable bindings of one solution, or the initial bindings of a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingSet {
    values: BTreeMap<String, Term>,
}

impl BindingSet {
    /// Create an empty binding set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style binding
    pub fn with(mut self, name: impl Into<String>, value: Term) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Bind a variable
    pub fn insert(&mut self, name: String, value: Term) {
        self.values.insert(name, value);
    }

    /// Value bound to a variable
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.values.get(name)
    }

    /// Number of bound variables
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if no variable is bound
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over bindings in variable order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.values.iter()
    }
}

/// Graphs a read is evaluated against
///
/// An empty graph list means the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dataset {
    /// Accepted contexts, `None` being the default graph
    pub graphs: Vec<Option<Term>>,
}

impl Dataset {
    /// Dataset spanning every graph
    pub fn all() -> Self {
        Self::default()
    }

    /// Dataset restricted to the given graphs
    pub fn of(graphs: Vec<Option<Term>>) -> Self {
        Self { graphs }
    }
}

/// Evaluate a basic graph pattern against a statement source
///
/// Every returned solution extends `bindings`. A query without patterns
/// yields the initial bindings as its single solution.
pub fn evaluate<S: StatementSource + ?Sized>(
    source: &S,
    query: &QueryExpr,
    dataset: &Dataset,
    bindings: &BindingSet,
    include_inferred: bool,
) -> Result<Vec<BindingSet>> {
    let mut solutions = vec![bindings.clone()];

    for triple in &query.patterns {
        let mut next = Vec::new();
        for solution in &solutions {
            let pattern = triple.to_statement_pattern(solution, dataset);
            for statement in source.statements(&pattern, include_inferred)? {
                if let Some(extended) = triple.bind(&statement, solution) {
                    next.push(extended);
                }
            }
        }
        if next.is_empty() {
            return Ok(next);
        }
        solutions = next;
    }

    Ok(solutions)
}
