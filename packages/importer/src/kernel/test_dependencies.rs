// TestDependencies - in-memory implementations for testing
//
// Provides fakes for every Base* trait so the pipeline can run end to end
// without Postgres or Redis.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::queue::MemoryBatchQueue;
use super::run_lock::MemoryRunLock;
use super::{BaseFeedFetcher, BaseJobStore, BaseRunStore, ImportDeps, StreamHub};
use crate::common::ImportError;
use crate::config::ImportSettings;
use crate::domains::imports::models::{
    BatchOutcome, FailureSample, ImportRun, NewImportRun, RunFilter, RunPage,
};
use crate::domains::jobs::models::JobUpsert;

// =============================================================================
// Memory Run Store
// =============================================================================

/// Every method holds the table lock for its whole mutation, which gives the
/// same atomicity as the single-statement SQL.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: tokio::sync::Mutex<HashMap<Uuid, ImportRun>>,
    failing_fetch_outcomes: AtomicUsize,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Make the next `n` fetch-outcome writes fail.
    pub fn fail_next_fetch_outcomes(&self, n: usize) {
        self.failing_fetch_outcomes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BaseRunStore for MemoryRunStore {
    async fn insert(&self, run: &NewImportRun) -> Result<ImportRun> {
        let run = ImportRun::new(Uuid::now_v7(), run);
        self.runs.lock().await.insert(run.id, run.clone());
        Ok(run)
    }

    async fn find(&self, run_id: Uuid) -> Result<Option<ImportRun>> {
        Ok(self.runs.lock().await.get(&run_id).cloned())
    }

    async fn list(&self, filter: &RunFilter) -> Result<RunPage> {
        let filter = filter.clone().normalized();
        let runs = self.runs.lock().await;

        let mut matching: Vec<&ImportRun> = runs.values().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect();
        Ok(RunPage::new(items, total, &filter))
    }

    async fn record_fetch_outcome(
        &self,
        run_id: Uuid,
        total_fetched: i64,
        total_batches: i64,
        invalid_count: i64,
        samples: &[FailureSample],
        sample_limit: usize,
    ) -> Result<Option<ImportRun>> {
        let should_fail = self
            .failing_fetch_outcomes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(anyhow!("connection reset by peer"));
        }

        let mut runs = self.runs.lock().await;
        Ok(runs.get_mut(&run_id).and_then(|run| {
            run.apply_fetch_outcome(total_fetched, total_batches, invalid_count, samples, sample_limit)
                .then(|| run.clone())
        }))
    }

    async fn fail(
        &self,
        run_id: Uuid,
        sample: &FailureSample,
        sample_limit: usize,
    ) -> Result<Option<ImportRun>> {
        let mut runs = self.runs.lock().await;
        Ok(runs
            .get_mut(&run_id)
            .and_then(|run| run.fail(sample, sample_limit).then(|| run.clone())))
    }

    async fn apply_batch_outcome(
        &self,
        run_id: Uuid,
        outcome: &BatchOutcome,
        sample_limit: usize,
    ) -> Result<Option<ImportRun>> {
        let mut runs = self.runs.lock().await;
        Ok(runs.get_mut(&run_id).map(|run| {
            run.apply_batch_outcome(outcome, sample_limit);
            run.clone()
        }))
    }

    async fn try_finalize(&self, run_id: Uuid, allow_empty: bool) -> Result<Option<ImportRun>> {
        let mut runs = self.runs.lock().await;
        Ok(runs
            .get_mut(&run_id)
            .and_then(|run| run.try_finalize(allow_empty).then(|| run.clone())))
    }
}

// =============================================================================
// Memory Job Store
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredJob {
    pub job: JobUpsert,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, StoredJob>>,
    failing_upserts: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` bulk upserts fail.
    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, dedupe_key: &str) -> Option<StoredJob> {
        self.jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.get(dedupe_key).cloned())
    }

    pub fn jobs(&self) -> Vec<JobUpsert> {
        self.jobs
            .lock()
            .map(|jobs| jobs.values().map(|s| s.job.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BaseJobStore for MemoryJobStore {
    async fn existing_keys(&self, keys: &[String]) -> Result<HashSet<String>> {
        let jobs = self.jobs.lock().map_err(|_| anyhow!("job store poisoned"))?;
        Ok(keys
            .iter()
            .filter(|k| jobs.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn bulk_upsert(&self, upserts: &[JobUpsert]) -> Result<u64> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(anyhow!("connection reset by peer"));
        }

        let mut jobs = self.jobs.lock().map_err(|_| anyhow!("job store poisoned"))?;
        let now = Utc::now();
        for job in upserts {
            jobs.entry(job.dedupe_key.clone())
                .and_modify(|stored| {
                    stored.job = job.clone();
                    stored.updated_at = now;
                })
                .or_insert_with(|| StoredJob {
                    job: job.clone(),
                    created_at: now,
                    updated_at: now,
                });
        }
        Ok(upserts.len() as u64)
    }
}

// =============================================================================
// Mock Feed Fetcher
// =============================================================================

#[derive(Debug, Clone)]
enum FeedResponse {
    Body(String),
    HttpError(String),
}

#[derive(Default)]
pub struct MockFeedFetcher {
    responses: Mutex<HashMap<String, FeedResponse>>,
    calls: Mutex<Vec<String>>,
}

impl MockFeedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, url: &str, body: &str) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.to_string(), FeedResponse::Body(body.to_string()));
        }
        self
    }

    pub fn with_http_error(self, url: &str, message: &str) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(url.to_string(), FeedResponse::HttpError(message.to_string()));
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BaseFeedFetcher for MockFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ImportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        let response = self
            .responses
            .lock()
            .ok()
            .and_then(|responses| responses.get(url).cloned());
        match response {
            Some(FeedResponse::Body(body)) => Ok(body),
            Some(FeedResponse::HttpError(message)) => Err(ImportError::http(format!(
                "Failed to fetch XML from {}: {}",
                url, message
            ))),
            None => Err(ImportError::http(format!(
                "Failed to fetch XML from {}: HTTP 404 Not Found",
                url
            ))),
        }
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Container of in-memory fakes. Keeps concrete handles so tests can inspect
/// state after driving the pipeline through `ImportDeps`.
pub struct TestDependencies {
    pub run_store: Arc<MemoryRunStore>,
    pub job_store: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryBatchQueue>,
    pub lock: Arc<MemoryRunLock>,
    pub fetcher: Arc<dyn BaseFeedFetcher>,
    pub hub: StreamHub,
    pub settings: ImportSettings,
}

impl TestDependencies {
    pub fn new() -> Self {
        let settings = ImportSettings::default();
        Self {
            run_store: Arc::new(MemoryRunStore::new()),
            job_store: Arc::new(MemoryJobStore::new()),
            queue: Arc::new(MemoryBatchQueue::new(settings.batch_max_attempts)),
            lock: Arc::new(MemoryRunLock::new()),
            fetcher: Arc::new(MockFeedFetcher::new()),
            hub: StreamHub::new(),
            settings,
        }
    }

    /// Use a specific fetcher (a `MockFeedFetcher` or a real `FeedFetcher`)
    pub fn fetcher(mut self, fetcher: Arc<dyn BaseFeedFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size;
        self
    }

    pub fn failure_sample_limit(mut self, limit: usize) -> Self {
        self.settings.failure_sample_limit = limit;
        self
    }

    pub fn max_attempts(mut self, attempts: i32) -> Self {
        self.settings.batch_max_attempts = attempts;
        self.queue = Arc::new(MemoryBatchQueue::new(attempts));
        self
    }

    pub fn deps(&self) -> ImportDeps {
        ImportDeps {
            run_store: self.run_store.clone(),
            job_store: self.job_store.clone(),
            queue: self.queue.clone(),
            lock: self.lock.clone(),
            fetcher: self.fetcher.clone(),
            hub: self.hub.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
