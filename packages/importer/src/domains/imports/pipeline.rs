//! Import pipeline - the sweep driver and the per-source runner.
//!
//! ```text
//! run_sweep(sources)
//!     └─► RunLock::acquire(sweep key)  ── held elsewhere ──► Skipped
//!           └─► for each source, sequentially:
//!                 create run → fetch → parse → normalize → validate
//!                   → chunk → record fetch outcome → enqueue batches
//!           └─► RunLock::release
//! ```

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::batch::Batch;
use super::models::{FailureSample, ImportRun, RunStatus};
use super::run_tracker::RunTracker;
use crate::common::{ImportError, ReasonCode};
use crate::config::ImportSettings;
use crate::domains::feeds::{normalize, parse_feed, FeedSource};
use crate::domains::jobs::models::JobCandidate;
use crate::kernel::queue::BatchQueue;
use crate::kernel::{BaseFeedFetcher, BaseRunLock, SWEEP_LOCK_KEY};

/// What happened to one source during a sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub source_url: String,
    pub source_name: String,
    pub run_id: Option<Uuid>,
    pub status: Option<RunStatus>,
    pub total_fetched: usize,
    pub total_batches: usize,
    pub invalid: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    fn for_run(run: &ImportRun) -> Self {
        Self {
            source_url: run.source_url.clone(),
            source_name: run.source_name.clone(),
            run_id: Some(run.id),
            status: Some(run.status),
            total_fetched: run.total_fetched.max(0) as usize,
            total_batches: run.batch_meta.total_batches.max(0) as usize,
            invalid: 0,
            error: None,
        }
    }

    fn failed(source: &FeedSource, run_id: Option<Uuid>, error: &ImportError) -> Self {
        Self {
            source_url: source.url.clone(),
            source_name: source.source_name.clone(),
            run_id,
            status: run_id.map(|_| RunStatus::Failed),
            total_fetched: 0,
            total_batches: 0,
            invalid: 0,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SweepReport {
    /// Another sweep holds the lock; nothing was fetched or created.
    Skipped,
    Completed { runs: Vec<RunSummary> },
}

pub struct ImportPipeline {
    fetcher: Arc<dyn BaseFeedFetcher>,
    tracker: Arc<RunTracker>,
    queue: Arc<dyn BatchQueue>,
    lock: Arc<dyn BaseRunLock>,
    settings: ImportSettings,
}

impl ImportPipeline {
    pub fn new(
        fetcher: Arc<dyn BaseFeedFetcher>,
        tracker: Arc<RunTracker>,
        queue: Arc<dyn BatchQueue>,
        lock: Arc<dyn BaseRunLock>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            fetcher,
            tracker,
            queue,
            lock,
            settings,
        }
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    /// Import every source under the sweep lock. Skips the whole cycle when
    /// the lock is held.
    pub async fn run_sweep(&self, sources: &[FeedSource]) -> anyhow::Result<SweepReport> {
        let Some(token) = self.lock.acquire(SWEEP_LOCK_KEY, self.settings.lock_ttl).await? else {
            info!("import sweep skipped, another sweep holds the lock");
            return Ok(SweepReport::Skipped);
        };

        info!(sources = sources.len(), "import sweep started");
        let mut runs = Vec::with_capacity(sources.len());
        for source in sources {
            let summary = match self.run_import_for_source(source).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(source_url = %source.url, error = %e, "source import failed");
                    RunSummary::failed(source, None, &e)
                }
            };
            runs.push(summary);
        }

        match self.lock.release(SWEEP_LOCK_KEY, &token).await {
            Ok(true) => {}
            Ok(false) => warn!("sweep lock expired before release"),
            Err(e) => warn!(error = %e, "failed to release sweep lock"),
        }

        info!(sources = runs.len(), "import sweep finished");
        Ok(SweepReport::Completed { runs })
    }

    /// Import one source under the same lock as a full sweep.
    pub async fn run_single(&self, source: &FeedSource) -> anyhow::Result<SweepReport> {
        self.run_sweep(std::slice::from_ref(source)).await
    }

    /// Run one source end to end up to enqueueing its batches. Fetch and
    /// parse failures fail the run and come back as a failed summary; only
    /// run-store failures are errors.
    pub async fn run_import_for_source(&self, source: &FeedSource) -> Result<RunSummary, ImportError> {
        let run = self
            .tracker
            .create_run(
                &source.url,
                &source.source_name,
                self.settings.batch_size,
                self.settings.worker_concurrency,
            )
            .await?;

        let items = match self.fetch_candidates(source).await {
            Ok(items) => items,
            Err(e) => {
                self.tracker
                    .record_fetch_failure(run.id, e.reason_code(), &e.to_string())
                    .await?;
                return Ok(RunSummary::failed(source, Some(run.id), &e));
            }
        };

        let total_fetched = items.len();
        let mut valid: Vec<JobCandidate> = Vec::with_capacity(items.len());
        let mut invalid_samples: Vec<FailureSample> = Vec::new();
        for candidate in items {
            let report = candidate.validate();
            if report.is_ok() {
                valid.push(candidate);
            } else {
                invalid_samples.push(
                    FailureSample::new(ReasonCode::ValidationError, report.errors.join(", "))
                        .with_dedupe_key(candidate.dedupe_key.clone())
                        .with_sample(candidate.redacted()),
                );
            }
        }
        let invalid = invalid_samples.len();

        let chunks: Vec<Vec<JobCandidate>> = valid
            .chunks(self.settings.batch_size.max(1))
            .map(<[JobCandidate]>::to_vec)
            .collect();
        let total_batches = chunks.len();

        let recorded = match self
            .tracker
            .record_fetch_outcome(run.id, total_fetched, total_batches, &invalid_samples, invalid)
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                let message = format!("Failed to record fetch outcome: {}", e);
                if let Err(fail_err) = self
                    .tracker
                    .record_fetch_failure(run.id, ReasonCode::Unknown, &message)
                    .await
                {
                    warn!(run_id = %run.id, error = %fail_err, "could not fail run after fetch outcome error");
                }
                return Err(ImportError::Other(e));
            }
        };

        for (index, jobs) in chunks.into_iter().enumerate() {
            let batch = Batch {
                run_id: run.id,
                source_url: source.url.clone(),
                source_name: source.source_name.clone(),
                batch_index: index as i64,
                total_batches: total_batches as i64,
                jobs,
            };
            let enqueued = match batch.to_payload() {
                Ok(payload) => self.queue.enqueue(run.id, payload).await.map_err(ImportError::Other),
                Err(e) => Err(e),
            };
            if let Err(e) = enqueued {
                let message = format!("Failed to enqueue batch {}: {}", index, e);
                self.tracker
                    .record_fetch_failure(run.id, ReasonCode::Unknown, &message)
                    .await?;
                return Ok(RunSummary::failed(source, Some(run.id), &e));
            }
        }

        info!(
            run_id = %run.id,
            source_url = %source.url,
            total_fetched,
            total_batches,
            invalid,
            "batches enqueued"
        );

        Ok(RunSummary {
            invalid,
            ..RunSummary::for_run(&recorded)
        })
    }

    async fn fetch_candidates(&self, source: &FeedSource) -> Result<Vec<JobCandidate>, ImportError> {
        let raw = self.fetcher.fetch(&source.url).await?;
        let feed = parse_feed(&raw)?;
        Ok(feed
            .items
            .iter()
            .map(|item| normalize(&source.url, &source.source_name, item))
            .collect())
    }
}
