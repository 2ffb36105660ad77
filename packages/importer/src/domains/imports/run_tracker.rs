//! RunTracker - owns the ImportRun lifecycle.
//!
//! ```text
//! running ──► completed   (all batches processed, failedJobs == 0)
//!    │   ├──► partial     (all batches processed, failedJobs > 0)
//!    │   └──► failed      (fetch/parse failed before anything was queued)
//! ```
//!
//! Counter increments and the finalization check never happen as separate
//! read and write steps: the store applies a batch outcome atomically and
//! returns the post-increment row, then the terminal transition is a
//! conditional update guarded on `status = running`. Only the caller whose
//! conditional update matches finalizes; everyone else gets `None`.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::publish_run_changed;
use super::models::{
    BatchOutcome, FailureSample, ImportRun, NewImportRun, RunFilter, RunPage,
};
use crate::common::ReasonCode;
use crate::kernel::{BaseRunStore, StreamHub};

pub struct RunTracker {
    store: Arc<dyn BaseRunStore>,
    hub: StreamHub,
    sample_limit: usize,
}

impl RunTracker {
    pub fn new(store: Arc<dyn BaseRunStore>, hub: StreamHub, sample_limit: usize) -> Self {
        Self {
            store,
            hub,
            sample_limit,
        }
    }

    pub fn hub(&self) -> &StreamHub {
        &self.hub
    }

    pub async fn create_run(
        &self,
        source_url: &str,
        source_name: &str,
        batch_size: usize,
        concurrency: usize,
    ) -> Result<ImportRun> {
        let run = self
            .store
            .insert(&NewImportRun {
                source_url: source_url.to_string(),
                source_name: source_name.to_string(),
                batch_size: batch_size as i64,
                concurrency: concurrency as i64,
            })
            .await?;

        info!(run_id = %run.id, source_url = %source_url, "import run started");
        publish_run_changed(&self.hub, &run).await;
        Ok(run)
    }

    /// Record what fetch/parse/normalize/chunk produced. Called once, before
    /// any batch is enqueued. A run with nothing to enqueue finalizes here.
    pub async fn record_fetch_outcome(
        &self,
        run_id: Uuid,
        total_fetched: usize,
        total_batches: usize,
        invalid_samples: &[FailureSample],
        invalid_count: usize,
    ) -> Result<ImportRun> {
        let run = self
            .store
            .record_fetch_outcome(
                run_id,
                total_fetched as i64,
                total_batches as i64,
                invalid_count as i64,
                invalid_samples,
                self.sample_limit,
            )
            .await?
            .ok_or_else(|| anyhow!("import run {} is not running", run_id))?;

        debug!(
            run_id = %run_id,
            total_fetched,
            total_batches,
            invalid_count,
            "fetch outcome recorded"
        );

        let run = match self.store.try_finalize(run_id, total_batches == 0).await? {
            Some(finished) => {
                log_finished(&finished);
                finished
            }
            None => run,
        };

        publish_run_changed(&self.hub, &run).await;
        Ok(run)
    }

    /// Fail a run that never got its batches queued. A no-op on terminal runs.
    pub async fn record_fetch_failure(
        &self,
        run_id: Uuid,
        reason_code: ReasonCode,
        message: &str,
    ) -> Result<Option<ImportRun>> {
        let sample = FailureSample::new(reason_code, message);
        let failed = self.store.fail(run_id, &sample, self.sample_limit).await?;

        match &failed {
            Some(run) => {
                warn!(
                    run_id = %run_id,
                    source_url = %run.source_url,
                    reason_code = %reason_code,
                    error = %message,
                    "import run failed"
                );
                publish_run_changed(&self.hub, run).await;
            }
            None => debug!(run_id = %run_id, "fetch failure on a run that is not running"),
        }

        Ok(failed)
    }

    /// The hot path: one call per batch attempt, possibly concurrent.
    pub async fn record_batch_outcome(
        &self,
        run_id: Uuid,
        outcome: &BatchOutcome,
    ) -> Result<ImportRun> {
        let run = self
            .store
            .apply_batch_outcome(run_id, outcome, self.sample_limit)
            .await?
            .ok_or_else(|| anyhow!("import run {} not found", run_id))?;

        debug!(
            run_id = %run_id,
            batch_index = outcome.batch_index,
            processed = run.batch_meta.processed_batches,
            total = run.batch_meta.total_batches,
            "batch outcome recorded"
        );

        let run = if run.is_running() && run.all_batches_processed() {
            match self.store.try_finalize(run_id, false).await? {
                Some(finished) => {
                    log_finished(&finished);
                    finished
                }
                None => run,
            }
        } else {
            run
        };

        publish_run_changed(&self.hub, &run).await;
        Ok(run)
    }

    pub async fn find(&self, run_id: Uuid) -> Result<Option<ImportRun>> {
        self.store.find(run_id).await
    }

    pub async fn list(&self, filter: &RunFilter) -> Result<RunPage> {
        self.store.list(filter).await
    }
}

fn log_finished(run: &ImportRun) {
    info!(
        run_id = %run.id,
        status = %run.status,
        total_fetched = run.total_fetched,
        new_jobs = run.new_jobs,
        updated_jobs = run.updated_jobs,
        failed_jobs = run.failed_jobs,
        duration_ms = run.batch_meta.duration_ms.unwrap_or_default(),
        "import run finished"
    );
}
