//! Batch worker pool.
//!
//! ```text
//! BatchWorkerPool
//!     ├─► claim up to `concurrency` batches
//!     ├─► BatchHandler::handle for each, concurrently
//!     └─► mark succeeded / failed (retryable or not)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{BatchQueue, ClaimedBatch, ErrorKind};
use crate::common::ImportError;

/// Executes one claimed batch.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: &ClaimedBatch) -> Result<(), ImportError>;
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum number of batches in flight
    pub concurrency: usize,
    /// How long to wait when the queue is empty
    pub poll_interval: Duration,
    pub worker_id: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
            worker_id: format!("batch-worker-{}", Uuid::new_v4()),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..Default::default()
        }
    }
}

pub struct BatchWorkerPool {
    queue: Arc<dyn BatchQueue>,
    handler: Arc<dyn BatchHandler>,
    config: WorkerPoolConfig,
}

impl BatchWorkerPool {
    pub fn new(
        queue: Arc<dyn BatchQueue>,
        handler: Arc<dyn BatchHandler>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Poll until `shutdown` fires. In-flight batches finish first.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            "batch worker pool starting"
        );

        while !shutdown.is_cancelled() {
            match self.run_once(&shutdown).await {
                Ok(0) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "failed to claim batches");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "batch worker pool stopped");
    }

    /// Process until nothing is ready to claim. Returns batches handled.
    pub async fn drain(&self) -> Result<usize> {
        let shutdown = CancellationToken::new();
        let mut total = 0;
        loop {
            let processed = self.run_once(&shutdown).await?;
            if processed == 0 {
                return Ok(total);
            }
            total += processed;
        }
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> Result<usize> {
        let batches = self
            .queue
            .claim(&self.config.worker_id, self.config.concurrency as i64)
            .await?;
        if batches.is_empty() {
            return Ok(0);
        }

        debug!(count = batches.len(), "claimed batches");
        let count = batches.len();
        futures::future::join_all(
            batches
                .into_iter()
                .map(|batch| self.process(batch, shutdown)),
        )
        .await;
        Ok(count)
    }

    async fn process(&self, batch: ClaimedBatch, shutdown: &CancellationToken) {
        let id = batch.id;
        match self.handler.handle(&batch).await {
            Ok(()) => {
                debug!(batch_job_id = %id, run_id = %batch.run_id, "batch succeeded");
                if let Err(e) = self.queue.mark_succeeded(id).await {
                    error!(batch_job_id = %id, error = %e, "failed to mark batch as succeeded");
                }
            }
            Err(e) => {
                let kind = if !e.is_retryable() {
                    ErrorKind::NonRetryable
                } else if shutdown.is_cancelled() {
                    ErrorKind::Shutdown
                } else {
                    ErrorKind::Retryable
                };
                warn!(
                    batch_job_id = %id,
                    run_id = %batch.run_id,
                    attempt = batch.attempt,
                    reason_code = %e.reason_code(),
                    error = %e,
                    "batch failed"
                );
                if let Err(e) = self.queue.mark_failed(id, &e.to_string(), kind).await {
                    error!(batch_job_id = %id, error = %e, "failed to mark batch as failed");
                }
            }
        }
    }
}
