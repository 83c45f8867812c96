//! Error types for Trellis stores
//!
//! This module defines the errors surfaced by statement stores and their
//! connections. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for statement stores
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A write or commit was issued without a native transaction
    #[error("No native transaction is active")]
    TransactionNotActive,

    /// `begin()` was called while a native transaction was already running
    #[error("A native transaction is already active")]
    TransactionAlreadyActive,

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Fault injected by a test harness
    #[error("Injected fault: {0}")]
    Injected(String),
}

impl Error {
    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }
}
