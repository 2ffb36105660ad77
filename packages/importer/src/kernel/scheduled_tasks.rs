//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (every IMPORT_INTERVAL_MINUTES)
//!     └─► ImportPipeline::run_sweep(sources)
//!             └─► skipped when another sweep holds the lock
//! ```

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::feeds::FeedSource;
use crate::domains::imports::{ImportPipeline, SweepReport};

/// Start the repeating import sweep. With `run_on_boot` the first sweep is
/// spawned right away instead of waiting a full interval.
pub async fn start_scheduler(
    pipeline: Arc<ImportPipeline>,
    sources: Vec<FeedSource>,
    interval: Duration,
    run_on_boot: bool,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let sources = Arc::new(sources);
    let source_count = sources.len();

    let sweep_pipeline = pipeline.clone();
    let sweep_sources = sources.clone();
    let sweep_job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let pipeline = sweep_pipeline.clone();
        let sources = sweep_sources.clone();
        Box::pin(async move {
            run_scheduled_sweep(&pipeline, &sources).await;
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    if run_on_boot {
        tokio::spawn(async move {
            run_scheduled_sweep(&pipeline, &sources).await;
        });
    }

    tracing::info!(
        interval_secs = interval.as_secs(),
        sources = source_count,
        "Scheduled import sweep started"
    );
    Ok(scheduler)
}

async fn run_scheduled_sweep(pipeline: &ImportPipeline, sources: &[FeedSource]) {
    tracing::info!("Running scheduled import sweep");

    match pipeline.run_sweep(sources).await {
        Ok(SweepReport::Skipped) => {
            tracing::info!("Scheduled import sweep skipped: lock held");
        }
        Ok(SweepReport::Completed { runs }) => {
            let failed = runs.iter().filter(|r| r.error.is_some()).count();
            tracing::info!(sources = runs.len(), failed, "Scheduled import sweep finished");
        }
        Err(e) => {
            tracing::error!("Scheduled import sweep failed: {}", e);
        }
    }
}
