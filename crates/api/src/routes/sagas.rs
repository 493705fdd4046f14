//! Saga audit endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use entity_store::EntityStore;
use saga::CompensationLog;

use super::AppState;
use crate::error::ApiError;
use crate::extract::{CallerIdentity, parse_id};

/// GET /sagas/:id/logs: compensation logs recorded for a saga run.
#[tracing::instrument(skip(state))]
pub async fn logs<S: EntityStore>(
    State(state): State<Arc<AppState<S>>>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<Vec<CompensationLog>>, ApiError> {
    caller.require_admin()?;
    let logs = state.coordinator.compensation_logs(parse_id(&id)?).await?;
    Ok(Json(logs))
}
