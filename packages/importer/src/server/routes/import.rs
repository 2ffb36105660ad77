use axum::{extract::Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::ApiError;
use crate::domains::feeds::FeedSource;
use crate::domains::imports::SweepReport;
use crate::server::app::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunImportRequest {
    pub source_url: Option<String>,
}

/// Manually trigger an import.
///
/// With `sourceUrl` only that registered source is imported, otherwise every
/// source is swept. Both paths take the sweep lock and answer 409 while
/// another sweep holds it.
pub async fn run_import_handler(
    Extension(state): Extension<AppState>,
    body: Option<Json<RunImportRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let report = match request.source_url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => {
            let source = FeedSource::find(&state.sources, url)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown feed source: {}", url)))?;
            info!(source_url = %url, "manual import requested");
            state.pipeline.run_single(source).await?
        }
        None => {
            info!(sources = state.sources.len(), "manual sweep requested");
            state.pipeline.run_sweep(&state.sources).await?
        }
    };

    match report {
        SweepReport::Skipped => Err(ApiError::conflict("An import sweep is already running")),
        SweepReport::Completed { runs } => Ok(Json(json!({ "ok": true, "runs": runs }))),
    }
}
