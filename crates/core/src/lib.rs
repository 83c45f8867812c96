//! Core types and traits for Trellis
//!
//! This crate defines the foundational types used throughout the system:
//! - Term: IRIs, blank nodes and literals
//! - Statement / StatementPattern: quads and selection patterns
//! - Model: ordered statement set used as a delta model
//! - QueryExpr / BindingSet / Dataset: basic graph pattern queries
//! - Namespace: prefix bindings
//! - Error: Error type hierarchy
//! - Traits: StatementSource and StoreConnection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod model;
pub mod namespace;
pub mod query;
pub mod statement;
pub mod term;
pub mod traits;

pub use error::{Error, Result};
pub use model::Model;
pub use namespace::Namespace;
pub use query::{evaluate, BindingSet, Dataset, PatternTerm, QueryExpr, TriplePattern};
pub use statement::{Statement, StatementPattern};
pub use term::{Literal, Term};
pub use traits::{StatementSource, StoreConnection};
