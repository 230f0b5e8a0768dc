//! Error types for mutex operations.

use remutex_core::StoreError;
use thiserror::Error;

/// Errors surfaced by the mutex facade and protocol handlers.
#[derive(Debug, Error)]
pub enum MutexError {
    /// Invalid configuration or misuse of the lifecycle API.
    #[error("configuration error: {reason}")]
    Configuration {
        /// Human-readable description of what was invalid.
        reason: String,
    },

    /// The calling owner already holds one of the requested names.
    ///
    /// Raised instead of queueing, since the wakeup this waiter needs can
    /// only come from itself.
    #[error("deadlock detected: owner already holds '{name}'")]
    Deadlock {
        /// The first requested name found to be held by the caller.
        name: String,
    },

    /// A blocking acquisition ran out of time.
    #[error("timed out after {waited_ms}ms waiting for lock")]
    Timeout {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    /// The protocol was violated: malformed lease values, script failures,
    /// or a watcher that could not be established at setup.
    #[error("protocol error: {reason}")]
    Protocol {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// A store operation failed outside the watcher's retry umbrella.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_display() {
        let err = MutexError::Deadlock {
            name: "jobs:batch".to_string(),
        };
        assert_eq!(err.to_string(), "deadlock detected: owner already holds 'jobs:batch'");
    }

    #[test]
    fn timeout_display() {
        let err = MutexError::Timeout { waited_ms: 250 };
        assert_eq!(err.to_string(), "timed out after 250ms waiting for lock");
    }

    #[test]
    fn store_errors_pass_through() {
        let err = MutexError::from(StoreError::Closed);
        assert_eq!(err.to_string(), "store handle closed");
    }
}
