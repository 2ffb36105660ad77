// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The run state machine lives in RunTracker; stores only execute the atomic
// statements it asks for.
//
// Naming convention: Base* for trait names (e.g., BaseRunStore, BaseRunLock)

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::common::ImportError;
use crate::domains::imports::models::{
    BatchOutcome, FailureSample, ImportRun, NewImportRun, RunFilter, RunPage,
};
use crate::domains::jobs::models::JobUpsert;

// =============================================================================
// Feed Fetcher Trait (Infrastructure - outbound HTTP)
// =============================================================================

#[async_trait]
pub trait BaseFeedFetcher: Send + Sync {
    /// Fetch raw feed text. Every failure is an HTTP_ERROR.
    async fn fetch(&self, url: &str) -> Result<String, ImportError>;
}

// =============================================================================
// Run Store Trait (Infrastructure - import run persistence)
// =============================================================================

#[async_trait]
pub trait BaseRunStore: Send + Sync {
    async fn insert(&self, run: &NewImportRun) -> Result<ImportRun>;

    async fn find(&self, run_id: Uuid) -> Result<Option<ImportRun>>;

    /// Newest first, filtered and paginated.
    async fn list(&self, filter: &RunFilter) -> Result<RunPage>;

    /// Write fetch results and append samples while the run is still running.
    /// Returns `None` if the run does not exist or is no longer running.
    async fn record_fetch_outcome(
        &self,
        run_id: Uuid,
        total_fetched: i64,
        total_batches: i64,
        invalid_count: i64,
        samples: &[FailureSample],
        sample_limit: usize,
    ) -> Result<Option<ImportRun>>;

    /// Transition `running -> failed` with one sample. `None` if not running.
    async fn fail(
        &self,
        run_id: Uuid,
        sample: &FailureSample,
        sample_limit: usize,
    ) -> Result<Option<ImportRun>>;

    /// Apply one batch attempt in a single atomic step and return the row as
    /// it stands after the increment. `None` if the run does not exist.
    async fn apply_batch_outcome(
        &self,
        run_id: Uuid,
        outcome: &BatchOutcome,
        sample_limit: usize,
    ) -> Result<Option<ImportRun>>;

    /// Conditional terminal transition guarded on `status = running` and
    /// `processed_batches >= total_batches`. `total_batches = 0` only
    /// qualifies when `allow_empty` is set. `None` means someone else won or
    /// the run is not done.
    async fn try_finalize(&self, run_id: Uuid, allow_empty: bool) -> Result<Option<ImportRun>>;
}

// =============================================================================
// Job Store Trait (Infrastructure - job persistence)
// =============================================================================

#[async_trait]
pub trait BaseJobStore: Send + Sync {
    /// Which of these dedupe keys already have a persisted job.
    async fn existing_keys(&self, keys: &[String]) -> Result<HashSet<String>>;

    /// Insert-or-update keyed by dedupe key. Keys must be distinct.
    async fn bulk_upsert(&self, jobs: &[JobUpsert]) -> Result<u64>;
}

// =============================================================================
// Run Lock Trait (Infrastructure - cross-process mutual exclusion)
// =============================================================================

#[async_trait]
pub trait BaseRunLock: Send + Sync {
    /// Set-if-absent with expiry. Returns the owner token on success.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>>;

    /// Delete the key only if it still holds `token`. Returns whether it did.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;
}
