//! Import dependencies (using traits for testability)
//!
//! The central container that wires stores, queue, lock and fetcher into the
//! pipeline pieces. Production builds it from Postgres and Redis; tests build
//! it from `TestDependencies`.

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;

use super::queue::{BatchQueue, BatchWorkerPool, PostgresBatchQueue, WorkerPoolConfig};
use super::run_lock::RedisRunLock;
use super::{BaseFeedFetcher, BaseJobStore, BaseRunLock, BaseRunStore, StreamHub};
use crate::config::{Config, ImportSettings};
use crate::domains::feeds::FeedFetcher;
use crate::domains::imports::models::PostgresRunStore;
use crate::domains::imports::{BatchWorker, ImportPipeline, RunTracker};
use crate::domains::jobs::models::PostgresJobStore;

#[derive(Clone)]
pub struct ImportDeps {
    pub run_store: Arc<dyn BaseRunStore>,
    pub job_store: Arc<dyn BaseJobStore>,
    pub queue: Arc<dyn BatchQueue>,
    pub lock: Arc<dyn BaseRunLock>,
    pub fetcher: Arc<dyn BaseFeedFetcher>,
    pub hub: StreamHub,
    pub settings: ImportSettings,
}

impl ImportDeps {
    /// Postgres stores and queue, Redis lock, reqwest fetcher.
    pub async fn connect(pool: PgPool, config: &Config) -> Result<Self> {
        let fetcher = FeedFetcher::new(config.import.http_timeout)?;
        let lock = RedisRunLock::connect(&config.redis_url).await?;

        Ok(Self {
            run_store: Arc::new(PostgresRunStore::new(pool.clone())),
            job_store: Arc::new(PostgresJobStore::new(pool.clone())),
            queue: Arc::new(PostgresBatchQueue::new(pool, config.import.batch_max_attempts)),
            lock: Arc::new(lock),
            fetcher: Arc::new(fetcher),
            hub: StreamHub::new(),
            settings: config.import.clone(),
        })
    }

    pub fn tracker(&self) -> Arc<RunTracker> {
        Arc::new(RunTracker::new(
            self.run_store.clone(),
            self.hub.clone(),
            self.settings.failure_sample_limit,
        ))
    }

    pub fn pipeline(&self, tracker: Arc<RunTracker>) -> ImportPipeline {
        ImportPipeline::new(
            self.fetcher.clone(),
            tracker,
            self.queue.clone(),
            self.lock.clone(),
            self.settings.clone(),
        )
    }

    pub fn batch_worker(&self, tracker: Arc<RunTracker>) -> BatchWorker {
        BatchWorker::new(self.job_store.clone(), tracker)
    }

    pub fn worker_pool(&self, tracker: Arc<RunTracker>) -> BatchWorkerPool {
        BatchWorkerPool::new(
            self.queue.clone(),
            Arc::new(self.batch_worker(tracker)),
            WorkerPoolConfig::with_concurrency(self.settings.worker_concurrency),
        )
    }
}
