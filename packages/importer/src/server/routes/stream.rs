//! SSE endpoint for live import-run updates.
//!
//! GET /api/import-runs/stream?sourceUrl=..&runId=..
//!
//! Sends `connected`, then an `init` snapshot of the most recent runs, then
//! one `import_run` event per run mutation. With `runId` only that run's
//! channel is followed; with `sourceUrl` events for other sources are dropped.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Query},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use uuid::Uuid;

use super::ApiError;
use crate::domains::imports::events::run_topic;
use crate::domains::imports::models::RunFilter;
use crate::server::app::AppState;

const SNAPSHOT_SIZE: i64 = 20;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    source_url: Option<String>,
    run_id: Option<Uuid>,
}

pub async fn stream_import_runs(
    Extension(state): Extension<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let source_url = query.source_url.filter(|url| !url.trim().is_empty());

    // Subscribe before taking the snapshot so nothing falls in between
    let hub = state.tracker.hub();
    let rx = match query.run_id {
        Some(run_id) => hub.subscribe(&run_topic(run_id)).await,
        None => hub.subscribe_all(),
    };

    let snapshot = state
        .tracker
        .list(&RunFilter::recent(SNAPSHOT_SIZE, source_url.clone(), query.run_id))
        .await?;
    let init = Event::default()
        .event("init")
        .json_data(&json!({ "runs": snapshot.items }))
        .map_err(|e| ApiError::from(anyhow::Error::new(e)))?;

    let opening = stream::iter([
        Ok::<_, Infallible>(Event::default().event("connected").data("ok")),
        Ok(init),
    ]);

    let events = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(value) if matches_source(&value, source_url.as_deref()) => {
                let name = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("message");
                Event::default().event(name).json_data(&value).ok()
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                .event("lagged")
                .json_data(&json!({ "missed": n }))
                .ok(),
        };
        futures::future::ready(event.map(Ok))
    });

    Ok(Sse::new(opening.chain(events)).keep_alive(KeepAlive::default()))
}

fn matches_source(event: &Value, source_url: Option<&str>) -> bool {
    match source_url {
        Some(url) => event["run"]["sourceUrl"].as_str() == Some(url),
        None => true,
    }
}
