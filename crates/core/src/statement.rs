//! Statements and statement patterns
//!
//! A `Statement` is a quad: subject, predicate, object and an optional
//! context (named graph). `None` as context is the default graph.
//!
//! A `StatementPattern` selects statements. Unbound positions are wildcards.
//! The context list follows the usual store convention:
//! - empty list: statements in any graph
//! - `[None]`: statements in the default graph only
//! - `[Some(g1), Some(g2)]`: statements in either named graph

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::term::Term;

/// Context list of a pattern or a write call
pub type Contexts = SmallVec<[Option<Term>; 1]>;

/// A quad
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Statement {
    /// Subject resource
    pub subject: Term,
    /// Predicate IRI
    pub predicate: Term,
    /// Object term
    pub object: Term,
    /// Named graph, `None` for the default graph
    pub context: Option<Term>,
}

impl Statement {
    /// Create a statement in the default graph
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
            context: None,
        }
    }

    /// Create a statement with an explicit context
    pub fn with_context(subject: Term, predicate: Term, object: Term, context: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
            context,
        }
    }

    /// Move this statement into the given graph
    pub fn in_context(mut self, context: Term) -> Self {
        self.context = Some(context);
        self
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(ctx) = &self.context {
            write!(f, " {}", ctx)?;
        }
        write!(f, " .")
    }
}

/// Selection pattern over statements
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementPattern {
    /// Required subject, or wildcard
    pub subject: Option<Term>,
    /// Required predicate, or wildcard
    pub predicate: Option<Term>,
    /// Required object, or wildcard
    pub object: Option<Term>,
    /// Accepted contexts (empty = any)
    pub contexts: Contexts,
}

impl StatementPattern {
    /// Pattern matching every statement in every graph
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern with the given positions and any context
    pub fn new(subject: Option<Term>, predicate: Option<Term>, object: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
            contexts: Contexts::new(),
        }
    }

    /// Restrict this pattern to the given contexts
    pub fn in_contexts(mut self, contexts: &[Option<Term>]) -> Self {
        self.contexts = contexts.iter().cloned().collect();
        self
    }

    /// Pattern matching exactly one statement
    pub fn exact(statement: &Statement) -> Self {
        Self {
            subject: Some(statement.subject.clone()),
            predicate: Some(statement.predicate.clone()),
            object: Some(statement.object.clone()),
            contexts: std::iter::once(statement.context.clone()).collect(),
        }
    }

    /// Check whether a context is accepted by this pattern
    pub fn matches_context(&self, context: &Option<Term>) -> bool {
        self.contexts.is_empty() || self.contexts.iter().any(|c| c == context)
    }

    /// Check whether a statement is selected by this pattern
    pub fn matches(&self, statement: &Statement) -> bool {
        fn position(required: &Option<Term>, actual: &Term) -> bool {
            required.as_ref().map_or(true, |t| t == actual)
        }

        position(&self.subject, &statement.subject)
            && position(&self.predicate, &statement.predicate)
            && position(&self.object, &statement.object)
            && self.matches_context(&statement.context)
    }
}

impl fmt::Display for StatementPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn position(f: &mut fmt::Formatter<'_>, term: &Option<Term>, var: &str) -> fmt::Result {
            match term {
                Some(t) => write!(f, "{}", t),
                None => write!(f, "?{}", var),
            }
        }

        position(f, &self.subject, "s")?;
        write!(f, " ")?;
        position(f, &self.predicate, "p")?;
        write!(f, " ")?;
        position(f, &self.object, "o")?;
        if !self.contexts.is_empty() {
            write!(f, " FROM [")?;
            for (i, ctx) in self.contexts.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match ctx {
                    Some(t) => write!(f, "{}", t)?,
                    None => write!(f, "DEFAULT")?,
                }
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
