//! Error types for the replication engine.

use crate::state::ReplicationState;
use crate::storage::StoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        transient: bool,
    },

    /// The remote answered with something the protocol layer cannot decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication or authorization failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Local storage failure.
    #[error("local storage failure: {0}")]
    Storage(#[from] StoreError),

    /// Outstanding work was cancelled.
    #[error("replication cancelled")]
    Cancelled,

    /// Retry attempts were exhausted without a successful batch.
    #[error("retry attempts exhausted after {attempts} tries")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// An operation that requires an inactive replication was called while
    /// the replication is active.
    #[error("replication is active (state {state:?}); stop it first")]
    Busy {
        /// State the replication was in.
        state: ReplicationState,
    },
}

impl ReplicationError {
    /// Creates a retryable transport error.
    pub fn transport_transient(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            transient: false,
        }
    }

    /// Creates a local storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(StoreError::Failure(message.into()))
    }

    /// Returns true if the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ReplicationError::Transport { transient, .. } => *transient,
            ReplicationError::Cancelled => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ReplicationError::transport_transient("connection reset").is_transient());
        assert!(!ReplicationError::transport_fatal("bad certificate").is_transient());
        assert!(!ReplicationError::Auth("401".into()).is_transient());
        assert!(!ReplicationError::storage("db closed").is_transient());
        assert!(ReplicationError::Cancelled.is_transient());
    }

    #[test]
    fn error_display() {
        let err = ReplicationError::RetryExhausted { attempts: 5 };
        assert!(err.to_string().contains('5'));

        let err = ReplicationError::Busy {
            state: ReplicationState::Running,
        };
        assert!(err.to_string().contains("Running"));
    }
}
