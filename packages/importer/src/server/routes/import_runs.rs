use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use uuid::Uuid;

use super::ApiError;
use crate::domains::imports::models::{ImportRun, RunFilter, RunPage};
use crate::server::app::AppState;

/// Paginated run history, newest first.
pub async fn list_import_runs(
    Extension(state): Extension<AppState>,
    Query(filter): Query<RunFilter>,
) -> Result<Json<RunPage>, ApiError> {
    Ok(Json(state.tracker.list(&filter).await?))
}

pub async fn get_import_run(
    Extension(state): Extension<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ImportRun>, ApiError> {
    state
        .tracker
        .find(run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Import run {} not found", run_id)))
}
