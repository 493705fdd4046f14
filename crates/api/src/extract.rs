//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::EntityId;
use saga::{Caller, Role};

use crate::error::ApiError;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";

/// Caller identity from the `x-caller-id` and `x-caller-role` headers.
///
/// Authentication happens upstream; these headers are trusted as given.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity(pub Caller);

impl<S: Send + Sync> FromRequestParts<S> for CallerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ApiError::Unauthorized(format!("missing {name} header")))
        };

        let id = EntityId::parse(header(CALLER_ID_HEADER)?)
            .map_err(|e| ApiError::Unauthorized(format!("invalid {CALLER_ID_HEADER}: {e}")))?;
        let role: Role = header(CALLER_ROLE_HEADER)?
            .parse()
            .map_err(|e: saga::SagaError| ApiError::Unauthorized(e.to_string()))?;

        Ok(CallerIdentity(Caller::new(id, role)))
    }
}

/// Parses an id taken from the request path.
pub fn parse_id(raw: &str) -> Result<EntityId, ApiError> {
    EntityId::parse(raw).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(id: Option<&str>, role: Option<&str>) -> Result<Caller, ApiError> {
        let mut builder = Request::builder().uri("/");
        if let Some(id) = id {
            builder = builder.header(CALLER_ID_HEADER, id);
        }
        if let Some(role) = role {
            builder = builder.header(CALLER_ROLE_HEADER, role);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        CallerIdentity::from_request_parts(&mut parts, &())
            .await
            .map(|c| c.0)
    }

    #[tokio::test]
    async fn test_reads_caller_headers() {
        let id = EntityId::new();
        let caller = extract(Some(&id.to_string()), Some("driver")).await.unwrap();
        assert_eq!(caller, Caller::operator(id));
    }

    #[tokio::test]
    async fn test_rejects_missing_or_bad_headers() {
        let id = EntityId::new().to_string();
        assert!(matches!(extract(None, Some("admin")).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(extract(Some(&id), None).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(extract(Some("nope"), Some("admin")).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(extract(Some(&id), Some("root")).await, Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_parse_id() {
        let id = EntityId::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert!(matches!(parse_id("42"), Err(ApiError::BadRequest(_))));
    }
}
