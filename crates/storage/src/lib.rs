//! Storage layer for Trellis
//!
//! This crate implements a reference in-memory quad store:
//! - MemoryStore: shared statement set and namespace table behind a RwLock
//! - MemoryConnection: per-client connection with a native transaction
//! - Version counter bumped once per native commit
//! - One-shot fault injection for prepare/commit failure paths
//!
//! The store has no isolation of its own beyond atomic commit. Isolation
//! between concurrent clients is the job of `trellis-concurrency`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod memory;

pub use connection::MemoryConnection;
pub use memory::MemoryStore;
