//! Isolation Integration Tests
//!
//! End-to-end tests of OptimisticConnection over the in-memory store:
//! visibility, conflict detection at each isolation level, the overlay
//! flush, write-through locking, failure paths and the coordinator.

#[path = "../common/mod.rs"]
mod common;

mod config;
mod failures;
mod invariants;
mod overlay;
mod retry;
mod visibility;
