use thiserror::Error;

use crate::{EntityId, Version};

/// A business guard rejected an atomic update.
///
/// Returned from the mutation closure passed to
/// [`DocumentOpsExt::atomic_update`](crate::DocumentOpsExt::atomic_update)
/// when the current document state does not allow the change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct GuardViolation(pub String);

impl GuardViolation {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that can occur when interacting with the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested document does not exist.
    #[error("{collection} {id} not found")]
    NotFound {
        collection: &'static str,
        id: EntityId,
    },

    /// A document with the same identity or unique field already exists.
    #[error("{collection} {id} already exists")]
    AlreadyExists {
        collection: &'static str,
        id: EntityId,
    },

    /// A compare-and-swap write observed a different version than expected.
    #[error("{collection} {id}: expected version {expected}, found {actual}")]
    VersionMismatch {
        collection: &'static str,
        id: EntityId,
        expected: Version,
        actual: Version,
    },

    /// A guarded update was rejected by its guard.
    #[error("Guard rejected update: {0}")]
    GuardRejected(#[from] GuardViolation),

    /// A concurrent transaction modified data read or written by this one.
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// The transaction exceeded its maximum duration.
    #[error("Transaction exceeded its time limit")]
    TransactionTimeout,

    /// The store is temporarily unable to serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request and retrying will not help.
    #[error("Store rejected write: {0}")]
    Rejected(String),

    /// Multi-document transactions are not available on this store.
    #[error("Transactions are not supported by this store")]
    TransactionsUnsupported,

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::WriteConflict(_)
            | StoreError::TransactionTimeout
            | StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// Result type for entity store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::WriteConflict("x".into()).is_transient());
        assert!(StoreError::TransactionTimeout.is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::Rejected("nope".into()).is_transient());
        assert!(!StoreError::GuardRejected(GuardViolation::new("taken")).is_transient());
        assert!(
            !StoreError::NotFound {
                collection: "orders",
                id: EntityId::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn guard_violation_message() {
        let err = StoreError::from(GuardViolation::new("vehicle already booked"));
        assert_eq!(err.to_string(), "Guard rejected update: vehicle already booked");
    }
}
