//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{ErrorKind, RollbackStatus, SagaError, SagaFailure};
use serde::Serialize;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or unusable caller identity.
    #[error("{0}")]
    Unauthorized(String),

    /// A saga run failed.
    #[error(transparent)]
    Saga(#[from] SagaFailure),

    /// A read outside any saga failed.
    #[error(transparent)]
    Query(#[from] SagaError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::Saga(failure) => failure.kind,
            ApiError::Query(err) => err.kind(),
        }
    }
}

/// HTTP status for a failure classification.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::TransientStore => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ExternalGateway => StatusCode::BAD_GATEWAY,
        ErrorKind::CompensationFailure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    saga_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback: Option<RollbackStatus>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        metrics::counter!("api_errors_total", "kind" => kind.as_str()).increment(1);

        let body = match self {
            ApiError::Saga(failure) => {
                // Rollback details stay in the compensation log.
                let message = if status.is_server_error() || failure.funds_moved {
                    failure.user_message().to_string()
                } else {
                    failure.message.clone()
                };
                if failure.is_partial() {
                    tracing::error!(
                        saga_id = %failure.saga_id,
                        saga_type = failure.saga_type,
                        "saga left partially rolled back"
                    );
                }
                ErrorBody {
                    kind: kind.as_str(),
                    message,
                    saga_id: Some(failure.saga_id.to_string()),
                    rollback: Some(failure.rollback),
                }
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(error = %other, "internal server error");
                }
                ErrorBody {
                    kind: kind.as_str(),
                    message: other.to_string(),
                    saga_id: None,
                    rollback: None,
                }
            }
        };

        (status, axum::Json(serde_json::json!({ "error": body }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use common::EntityId;

    use super::*;

    fn failure(kind: ErrorKind, funds_moved: bool) -> SagaFailure {
        SagaFailure {
            saga_id: EntityId::new(),
            saga_type: "PAYOUT",
            kind,
            message: "ledger entry is not pending".into(),
            rollback: RollbackStatus::NotNeeded,
            funds_moved,
            compensations: Vec::new(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::TransientStore), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::ExternalGateway), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_saga_failure_uses_its_kind_for_status() {
        let response = ApiError::from(failure(ErrorKind::Conflict, false)).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_kind_of_local_errors() {
        assert_eq!(ApiError::BadRequest("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(ApiError::Unauthorized("x".into()).kind(), ErrorKind::Unauthorized);
        assert_eq!(
            ApiError::from(failure(ErrorKind::Internal, true)).kind(),
            ErrorKind::Internal
        );
    }
}
