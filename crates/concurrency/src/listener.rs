//! Connection listeners
//!
//! Listeners see writes as they are staged, not as they commit: each call
//! happens synchronously inside the write, in call order, with the exact
//! statement staged. A later rollback does not retract a notification.
//!
//! Callbacks run while the connection's state lock is held and must not
//! call back into the same connection.

use trellis_core::Statement;

/// Observer of staged writes on one connection
pub trait ConnectionListener: Send + Sync {
    /// A statement addition was staged (or written through)
    fn statement_added(&self, statement: &Statement);

    /// A statement removal was staged (or written through)
    fn statement_removed(&self, statement: &Statement);
}
