//! Error types for the storage contract.
//!
//! Errors are organized the same way the lifecycle is: pool errors,
//! connection errors, transaction errors, and opaque backend errors, all
//! wrapped by [`StorageError`]. Every error can be classified with
//! [`StorageError::kind`] and [`StorageError::class`] so callers can tell
//! "retry me" apart from "caller bug" and "backend failure" without
//! matching on concrete variants.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::context::CancelReason;
use crate::core::TxnState;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The context was canceled before a suspending operation completed.
    #[error("operation canceled: {reason}")]
    Canceled { reason: CancelReason },

    /// Pool admission errors
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Connection lifecycle errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Transaction lifecycle errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while acquiring connections from a pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool has been closed and accepts no new requests.
    #[error("pool for {backend_name} is closed")]
    Closed { backend_name: String },

    /// No session could be obtained before the acquire timeout.
    #[error("no connection available from {backend_name} after {waited_ms}ms")]
    ConnectionUnavailable { backend_name: String, waited_ms: u64 },
}

/// Errors related to a borrowed connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The connection was closed and can no longer be used.
    #[error("connection {connection_id} is already closed")]
    AlreadyClosed { connection_id: String },
}

/// Errors related to transactions.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The transaction was already committed or rolled back.
    #[error("transaction {txn_id} already {state}")]
    AlreadyResolved { txn_id: String, state: TxnState },

    /// The backend detected a concurrent modification on commit.
    ///
    /// The whole transaction must be retried, not just the commit.
    #[error("transaction {txn_id} conflicts with a concurrent commit: {message}")]
    Conflict { txn_id: String, message: String },
}

/// Errors originating from the backend itself.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend refused the request (resource limits, read-only, etc.).
    #[error("{backend_name} rejected the request: {message}")]
    Rejected {
        backend_name: String,
        message: String,
    },

    /// The session to the backend was lost.
    #[error("connection to {backend_name} lost: {message}")]
    ConnectionLost {
        backend_name: String,
        message: String,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors raised when validating configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration value is out of range or inconsistent.
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// The kind of a storage error, independent of its concrete payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Canceled,
    ConnectionUnavailable,
    PoolClosed,
    AlreadyResolved,
    AlreadyClosed,
    Conflict,
    BackendRejected,
    ConnectionLost,
    Internal,
    InvalidConfig,
}

impl ErrorKind {
    /// Returns how a caller is expected to react to this kind.
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::Canceled | ErrorKind::ConnectionUnavailable | ErrorKind::Conflict => {
                ErrorClass::Transient
            }
            ErrorKind::PoolClosed
            | ErrorKind::AlreadyResolved
            | ErrorKind::AlreadyClosed
            | ErrorKind::InvalidConfig => ErrorClass::CallerBug,
            ErrorKind::BackendRejected | ErrorKind::ConnectionLost | ErrorKind::Internal => {
                ErrorClass::Fatal
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Canceled => "canceled",
            ErrorKind::ConnectionUnavailable => "connection-unavailable",
            ErrorKind::PoolClosed => "pool-closed",
            ErrorKind::AlreadyResolved => "already-resolved",
            ErrorKind::AlreadyClosed => "already-closed",
            ErrorKind::Conflict => "conflict",
            ErrorKind::BackendRejected => "backend-rejected",
            ErrorKind::ConnectionLost => "connection-lost",
            ErrorKind::Internal => "internal",
            ErrorKind::InvalidConfig => "invalid-config",
        };
        write!(f, "{}", name)
    }
}

/// Broad classification of errors by expected caller reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Retrying with a fresh context (or a fresh transaction) may succeed.
    Transient,
    /// The caller used the API incorrectly; retrying will not help.
    CallerBug,
    /// The backend failed in a way the contract cannot recover from.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::CallerBug => write!(f, "caller-bug"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

impl StorageError {
    /// Creates a cancellation error.
    pub fn canceled(reason: CancelReason) -> Self {
        StorageError::Canceled { reason }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Canceled { .. } => ErrorKind::Canceled,
            StorageError::Pool(PoolError::Closed { .. }) => ErrorKind::PoolClosed,
            StorageError::Pool(PoolError::ConnectionUnavailable { .. }) => {
                ErrorKind::ConnectionUnavailable
            }
            StorageError::Connection(ConnectionError::AlreadyClosed { .. }) => {
                ErrorKind::AlreadyClosed
            }
            StorageError::Transaction(TransactionError::AlreadyResolved { .. }) => {
                ErrorKind::AlreadyResolved
            }
            StorageError::Transaction(TransactionError::Conflict { .. }) => ErrorKind::Conflict,
            StorageError::Backend(BackendError::Rejected { .. }) => ErrorKind::BackendRejected,
            StorageError::Backend(BackendError::ConnectionLost { .. }) => {
                ErrorKind::ConnectionLost
            }
            StorageError::Backend(BackendError::Internal { .. }) => ErrorKind::Internal,
            StorageError::Config(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Returns the classification of this error.
    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    /// Returns `true` if the failed operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns `true` if the error signals incorrect use of the API.
    pub fn is_caller_bug(&self) -> bool {
        self.class() == ErrorClass::CallerBug
    }

    /// Returns `true` if this is a commit conflict.
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Returns `true` if this error came from a canceled context.
    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_display() {
        let err = StorageError::canceled(CancelReason::DeadlineExceeded);
        assert_eq!(err.to_string(), "operation canceled: deadline exceeded");
        assert_eq!(err.kind(), ErrorKind::Canceled);
    }

    #[test]
    fn test_pool_error_display() {
        let err = StorageError::from(PoolError::ConnectionUnavailable {
            backend_name: "memory".to_string(),
            waited_ms: 250,
        });
        assert_eq!(
            err.to_string(),
            "no connection available from memory after 250ms"
        );
    }

    #[test]
    fn test_already_resolved_display() {
        let err = TransactionError::AlreadyResolved {
            txn_id: "t1".to_string(),
            state: TxnState::Committed,
        };
        assert_eq!(err.to_string(), "transaction t1 already committed");
    }

    #[test]
    fn test_error_classes() {
        let transient = [
            ErrorKind::Canceled,
            ErrorKind::ConnectionUnavailable,
            ErrorKind::Conflict,
        ];
        for kind in transient {
            assert_eq!(kind.class(), ErrorClass::Transient, "{kind}");
        }

        let bugs = [
            ErrorKind::AlreadyResolved,
            ErrorKind::AlreadyClosed,
            ErrorKind::PoolClosed,
        ];
        for kind in bugs {
            assert_eq!(kind.class(), ErrorClass::CallerBug, "{kind}");
        }

        let fatal = [ErrorKind::ConnectionLost, ErrorKind::BackendRejected];
        for kind in fatal {
            assert_eq!(kind.class(), ErrorClass::Fatal, "{kind}");
        }
    }

    #[test]
    fn test_storage_error_kind_mapping() {
        let err: StorageError = PoolError::Closed {
            backend_name: "memory".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::PoolClosed);
        assert!(err.is_caller_bug());
        assert!(!err.is_retryable());

        let err: StorageError = TransactionError::Conflict {
            txn_id: "t1".to_string(),
            message: "stale snapshot".to_string(),
        }
        .into();
        assert!(err.is_conflict());
        assert!(err.is_retryable());

        let err: StorageError = BackendError::ConnectionLost {
            backend_name: "memory".to_string(),
            message: "reset by peer".to_string(),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StorageError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::AlreadyResolved.to_string(), "already-resolved");
        assert_eq!(ErrorKind::BackendRejected.to_string(), "backend-rejected");
        assert_eq!(ErrorClass::CallerBug.to_string(), "caller-bug");
    }
}
