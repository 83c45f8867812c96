//! Namespace prefix bindings

use serde::{Deserialize, Serialize};
use std::fmt;

/// A prefix bound to a namespace IRI
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    /// Prefix, e.g. `foaf`
    pub prefix: String,
    /// Namespace IRI, e.g. `http://xmlns.com/foaf/0.1/`
    pub name: String,
}

impl Namespace {
    /// Create a namespace binding
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: <{}>", self.prefix, self.name)
    }
}
