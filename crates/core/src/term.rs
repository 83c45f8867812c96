//! RDF terms
//!
//! A `Term` is one position of a statement: an IRI, a blank node or a
//! literal. Terms are totally ordered so statement sets can be kept in
//! sorted collections, and hash structurally so read fingerprints built
//! from them deduplicate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal value with optional datatype IRI or language tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    /// Lexical form
    pub lexical: String,
    /// Datatype IRI, `None` for plain literals
    pub datatype: Option<String>,
    /// Language tag, only meaningful for plain literals
    pub language: Option<String>,
}

/// An RDF term
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// Absolute IRI
    Iri(String),
    /// Blank node with a store-local label
    BlankNode(String),
    /// Literal value
    Literal(Literal),
}

impl Term {
    /// Create an IRI term
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    /// Create a blank node term
    pub fn blank(label: impl Into<String>) -> Self {
        Term::BlankNode(label.into())
    }

    /// Create a plain literal
    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal(Literal {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        })
    }

    /// Create a typed literal
    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal(Literal {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            language: None,
        })
    }

    /// Create a language-tagged literal
    pub fn lang_literal(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal(Literal {
            lexical: lexical.into(),
            datatype: None,
            language: Some(language.into()),
        })
    }

    /// IRIs and blank nodes are resources; literals are not
    pub fn is_resource(&self) -> bool {
        !matches!(self, Term::Literal(_))
    }

    /// Check if this term is an IRI
    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::BlankNode(label) => write!(f, "_:{}", label),
            Term::Literal(lit) => {
                write!(f, "\"{}\"", lit.lexical.escape_default())?;
                if let Some(lang) = &lit.language {
                    write!(f, "@{}", lang)
                } else if let Some(dt) = &lit.datatype {
                    write!(f, "^^<{}>", dt)
                } else {
                    Ok(())
                }
            }
        }
    }
}
