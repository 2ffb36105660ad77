use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domains::feeds::FeedSource;
use crate::domains::imports::{ImportPipeline, RunTracker};
use crate::server::routes::{
    get_import_run, health_handler, list_import_runs, run_import_handler, stream_import_runs,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub pipeline: Arc<ImportPipeline>,
    pub tracker: Arc<RunTracker>,
    pub sources: Arc<Vec<FeedSource>>,
}

impl AppState {
    pub fn new(
        db_pool: PgPool,
        pipeline: Arc<ImportPipeline>,
        sources: Vec<FeedSource>,
    ) -> Self {
        let tracker = pipeline.tracker().clone();
        Self {
            db_pool,
            pipeline,
            tracker,
            sources: Arc::new(sources),
        }
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    // CORS configuration - dashboards may be served from anywhere
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/api/import/run", post(run_import_handler))
        .route("/api/import-runs", get(list_import_runs))
        .route("/api/import-runs/stream", get(stream_import_runs))
        .route("/api/import-runs/:run_id", get(get_import_run))
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
