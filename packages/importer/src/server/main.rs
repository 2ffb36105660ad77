// Main entry point for the job import service

use anyhow::{Context, Result};
use importer_core::kernel::{scheduled_tasks::start_scheduler, ImportDeps};
use importer_core::server::{build_app, AppState};
use importer_core::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,importer_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting job import service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        sources = config.feed_sources.len(),
        batch_size = config.import.batch_size,
        worker_concurrency = config.import.worker_concurrency,
        "Configuration loaded"
    );

    // Connect to database
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Wire the pipeline
    let deps = ImportDeps::connect(pool.clone(), &config)
        .await
        .context("Failed to build import dependencies")?;
    let tracker = deps.tracker();
    let pipeline = Arc::new(deps.pipeline(tracker.clone()));

    let shutdown = CancellationToken::new();

    let workers = if config.run_workers {
        let pool = Arc::new(deps.worker_pool(tracker.clone()));
        let token = shutdown.clone();
        Some(tokio::spawn(async move { pool.run(token).await }))
    } else {
        tracing::info!("Batch workers disabled (RUN_WORKERS=false)");
        None
    };

    let mut scheduler = if config.run_scheduler {
        Some(
            start_scheduler(
                pipeline.clone(),
                config.feed_sources.clone(),
                config.import.interval,
                true,
            )
            .await
            .context("Failed to start scheduler")?,
        )
    } else {
        tracing::info!("Scheduler disabled (RUN_SCHEDULER=false)");
        None
    };

    // Drop keyed stream channels whose viewers went away
    let hub = deps.hub.clone();
    let cleanup_token = shutdown.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = cleanup_token.cancelled() => break,
                _ = tick.tick() => hub.cleanup().await,
            }
        }
    });

    let app = build_app(AppState::new(pool, pipeline, config.feed_sources.clone()));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            server_token.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Failed to stop scheduler");
        }
    }
    if let Some(workers) = workers {
        let _ = workers.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
