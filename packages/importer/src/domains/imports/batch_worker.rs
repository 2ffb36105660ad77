//! BatchWorker - validates a batch, upserts its jobs, reports to the tracker.
//!
//! Every attempt reports an outcome, including attempts whose upsert failed,
//! so `processedBatches` always advances. The upsert is keyed by dedupe key,
//! which makes a redelivered batch indistinguishable from a first delivery.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

use super::batch::Batch;
use super::models::{BatchOutcome, FailureSample};
use super::run_tracker::RunTracker;
use crate::common::{ImportError, ReasonCode};
use crate::domains::jobs::models::{collapse_by_dedupe_key, JobUpsert};
use crate::kernel::queue::{BatchHandler, ClaimedBatch};
use crate::kernel::BaseJobStore;

pub struct BatchWorker {
    jobs: Arc<dyn BaseJobStore>,
    tracker: Arc<RunTracker>,
}

impl BatchWorker {
    pub fn new(jobs: Arc<dyn BaseJobStore>, tracker: Arc<RunTracker>) -> Self {
        Self { jobs, tracker }
    }

    /// Process one delivery of a batch payload.
    pub async fn process(&self, payload: &serde_json::Value) -> Result<BatchOutcome, ImportError> {
        let batch = Batch::from_payload(payload)?;

        let mut valid: Vec<JobUpsert> = Vec::with_capacity(batch.jobs.len());
        let mut samples: Vec<FailureSample> = Vec::new();
        for candidate in batch.jobs {
            let redacted = candidate.redacted();
            let dedupe_key = candidate.dedupe_key.clone();
            match candidate.into_upsert() {
                Ok(job) => valid.push(job),
                Err(report) => samples.push(
                    FailureSample::new(ReasonCode::ValidationError, report.errors.join(", "))
                        .with_dedupe_key(dedupe_key)
                        .with_sample(redacted),
                ),
            }
        }
        let invalid = samples.len() as i64;

        let mut outcome = BatchOutcome {
            batch_index: batch.batch_index,
            failed_count: invalid,
            ..Default::default()
        };

        if valid.is_empty() {
            outcome.failure_samples = samples;
            self.report(batch.run_id, &outcome).await?;
            return Ok(outcome);
        }

        let jobs = collapse_by_dedupe_key(valid);
        match self.upsert(&jobs).await {
            Ok(new_count) => {
                outcome.imported = jobs.len() as i64;
                outcome.new_count = new_count;
                outcome.updated_count = outcome.imported - new_count;
                outcome.failure_samples = samples;
                self.report(batch.run_id, &outcome).await?;

                debug!(
                    run_id = %batch.run_id,
                    batch_index = batch.batch_index,
                    imported = outcome.imported,
                    new = outcome.new_count,
                    "batch imported"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    run_id = %batch.run_id,
                    batch_index = batch.batch_index,
                    error = %e,
                    "bulk upsert failed"
                );
                samples.push(
                    FailureSample::new(ReasonCode::DbError, format!("Bulk upsert failed: {}", e))
                        .with_sample(json!({
                            "sourceUrl": batch.source_url,
                            "batchIndex": batch.batch_index,
                        })),
                );
                outcome.failed_count = invalid + 1;
                outcome.failure_samples = samples;
                self.report(batch.run_id, &outcome).await?;

                Err(ImportError::Database(e))
            }
        }
    }

    /// Upsert and return how many keys did not exist before.
    async fn upsert(&self, jobs: &[JobUpsert]) -> anyhow::Result<i64> {
        let keys: Vec<String> = jobs.iter().map(|j| j.dedupe_key.clone()).collect();
        let existing: HashSet<String> = self.jobs.existing_keys(&keys).await?;
        self.jobs.bulk_upsert(jobs).await?;
        Ok(keys.iter().filter(|k| !existing.contains(*k)).count() as i64)
    }

    async fn report(&self, run_id: uuid::Uuid, outcome: &BatchOutcome) -> Result<(), ImportError> {
        self.tracker
            .record_batch_outcome(run_id, outcome)
            .await
            .map(|_| ())
            .map_err(ImportError::Other)
    }
}

#[async_trait]
impl BatchHandler for BatchWorker {
    async fn handle(&self, batch: &ClaimedBatch) -> Result<(), ImportError> {
        self.process(&batch.payload).await.map(|_| ())
    }
}
