//! Saga error types.

use common::EntityId;
use domain::DomainError;
use entity_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification of a saga failure, exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A precondition was not met. Nothing was mutated.
    Validation,
    /// The caller may not run this workflow.
    Unauthorized,
    /// A referenced entity does not exist.
    NotFound,
    /// A guarded update was rejected by current state.
    Conflict,
    /// The store kept reporting write conflicts or timeouts.
    TransientStore,
    /// An external collaborator (payment gateway, asset store) failed.
    ExternalGateway,
    /// A rollback step itself failed.
    CompensationFailure,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::TransientStore => "transient_store",
            ErrorKind::ExternalGateway => "external_gateway",
            ErrorKind::CompensationFailure => "compensation_failure",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The caller lacks the required role.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A precondition was not met.
    #[error("{0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: EntityId },

    /// Current state does not allow the operation.
    #[error("{0}")]
    Conflict(String),

    /// Domain rule violation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Entity store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Payment gateway error.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Asset store error.
    #[error("Asset store error: {0}")]
    Assets(String),

    /// A compensation step failed.
    #[error("Compensation step '{step}' failed: {reason}")]
    CompensationFailed { step: String, reason: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Classifies the error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Unauthorized(_) => ErrorKind::Unauthorized,
            SagaError::Validation(_) => ErrorKind::Validation,
            SagaError::NotFound { .. } => ErrorKind::NotFound,
            SagaError::Conflict(_) => ErrorKind::Conflict,
            SagaError::Domain(e) if e.is_conflict() => ErrorKind::Conflict,
            SagaError::Domain(_) => ErrorKind::Validation,
            SagaError::Store(e) => match e {
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::AlreadyExists { .. }
                | StoreError::GuardRejected(_)
                | StoreError::VersionMismatch { .. } => ErrorKind::Conflict,
                e if e.is_transient() => ErrorKind::TransientStore,
                _ => ErrorKind::Internal,
            },
            SagaError::Gateway(_) | SagaError::Assets(_) => ErrorKind::ExternalGateway,
            SagaError::CompensationFailed { .. } => ErrorKind::CompensationFailure,
            SagaError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if re-running the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SagaError::Store(e) if e.is_transient())
    }

    pub(crate) fn not_found<D: entity_store::Document>(id: EntityId) -> Self {
        SagaError::NotFound {
            entity: D::COLLECTION,
            id,
        }
    }
}

impl From<tokio::time::error::Elapsed> for SagaError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SagaError::Store(StoreError::TransactionTimeout)
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_split_into_conflict_and_validation() {
        let id = EntityId::new();
        assert_eq!(
            SagaError::from(DomainError::DuplicateBooking(id)).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SagaError::from(DomainError::InvalidBankDetails("ifsc".into())).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn store_errors_classified() {
        assert_eq!(
            SagaError::from(StoreError::WriteConflict("x".into())).kind(),
            ErrorKind::TransientStore
        );
        assert_eq!(
            SagaError::from(StoreError::NotFound {
                collection: "orders",
                id: EntityId::new()
            })
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SagaError::from(StoreError::Rejected("disk".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn only_transient_store_errors_retry() {
        assert!(SagaError::from(StoreError::TransactionTimeout).is_transient());
        assert!(!SagaError::Gateway("down".into()).is_transient());
        assert!(!SagaError::Conflict("paid".into()).is_transient());
    }

    #[test]
    fn gateway_and_assets_are_external() {
        assert_eq!(SagaError::Gateway("x".into()).kind(), ErrorKind::ExternalGateway);
        assert_eq!(SagaError::Assets("x".into()).kind(), ErrorKind::ExternalGateway);
        assert_eq!(ErrorKind::ExternalGateway.to_string(), "external_gateway");
    }
}
