//! Error types for store operations.

use thiserror::Error;

/// Errors surfaced by a [`LockStore`](crate::LockStore) implementation.
///
/// Connection-level failures are retried by the watcher's reconnect loop;
/// everything else propagates to the caller of the lock operation that
/// triggered it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the connection dropped mid-operation.
    #[error("store connection failed: {reason}")]
    Connection {
        /// Human-readable description of the connection failure.
        reason: String,
    },

    /// The store returned a reply the protocol does not allow.
    #[error("store protocol violation: {reason}")]
    Protocol {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// The operation is not supported by this store implementation.
    #[error("operation not supported by this store: {operation}")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: String,
    },

    /// A server-side script was evicted from the script cache.
    ///
    /// Callers reload the script source and retry; this is routine after a
    /// store restart.
    #[error("server-side script not cached: {handle}")]
    ScriptMissing {
        /// The script handle that was rejected.
        handle: String,
    },

    /// The subscription or store handle has been closed.
    #[error("store handle closed")]
    Closed,
}
