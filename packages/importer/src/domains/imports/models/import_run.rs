use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{BatchOutcome, FailureSample, RunFilter, RunPage};
use crate::kernel::BaseRunStore;

/// Lifecycle of an import run. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "import_run_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(anyhow::anyhow!("unknown run status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BatchMeta {
    pub batch_size: i64,
    pub concurrency: i64,
    pub total_batches: i64,
    pub processed_batches: i64,
    pub attempts: i64,
    pub duration_ms: Option<i64>,
}

/// One import attempt for a single feed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    #[serde(rename = "runId")]
    pub id: Uuid,
    pub source_url: String,
    pub source_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub total_fetched: i64,
    pub total_imported: i64,
    pub new_jobs: i64,
    pub updated_jobs: i64,
    pub failed_jobs: i64,

    #[sqlx(flatten)]
    pub batch_meta: BatchMeta,

    pub failures: Json<Vec<FailureSample>>,

    /// Batch indexes that have reported at least once.
    #[serde(skip)]
    pub completed_batches: Vec<i64>,

    pub updated_at: DateTime<Utc>,
}

/// Fields fixed at run creation.
#[derive(Debug, Clone)]
pub struct NewImportRun {
    pub source_url: String,
    pub source_name: String,
    pub batch_size: i64,
    pub concurrency: i64,
}

impl ImportRun {
    pub fn new(id: Uuid, new: &NewImportRun) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_url: new.source_url.clone(),
            source_name: new.source_name.clone(),
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            total_fetched: 0,
            total_imported: 0,
            new_jobs: 0,
            updated_jobs: 0,
            failed_jobs: 0,
            batch_meta: BatchMeta {
                batch_size: new.batch_size,
                concurrency: new.concurrency,
                ..Default::default()
            },
            failures: Json(Vec::new()),
            completed_batches: Vec::new(),
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }

    /// All declared batches have reported at least once.
    pub fn all_batches_processed(&self) -> bool {
        self.batch_meta.total_batches > 0
            && self.batch_meta.processed_batches >= self.batch_meta.total_batches
    }

    // ---------------------------------------------------------------------
    // In-process state transitions. These mirror the SQL statements in
    // PostgresRunStore one to one and back the in-memory store.
    // ---------------------------------------------------------------------

    /// Append samples up to the remaining budget; only while running.
    pub fn append_samples(&mut self, samples: &[FailureSample], limit: usize) {
        if !self.is_running() {
            return;
        }
        let remaining = limit.saturating_sub(self.failures.0.len());
        self.failures
            .0
            .extend(samples.iter().take(remaining).cloned());
    }

    pub fn apply_fetch_outcome(
        &mut self,
        total_fetched: i64,
        total_batches: i64,
        invalid_count: i64,
        samples: &[FailureSample],
        limit: usize,
    ) -> bool {
        if !self.is_running() {
            return false;
        }
        self.total_fetched = total_fetched;
        self.batch_meta.total_batches = total_batches;
        self.failed_jobs += invalid_count;
        self.append_samples(samples, limit);
        self.updated_at = Utc::now();
        true
    }

    pub fn apply_batch_outcome(&mut self, outcome: &BatchOutcome, limit: usize) {
        self.total_imported += outcome.imported;
        self.new_jobs += outcome.new_count;
        self.updated_jobs += outcome.updated_count;
        self.failed_jobs += outcome.failed_count;
        self.batch_meta.attempts += 1;
        if !self.completed_batches.contains(&outcome.batch_index) {
            self.completed_batches.push(outcome.batch_index);
            self.batch_meta.processed_batches += 1;
        }
        self.append_samples(&outcome.failure_samples, limit);
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, sample: &FailureSample, limit: usize) -> bool {
        if !self.is_running() {
            return false;
        }
        self.failed_jobs += 1;
        self.append_samples(std::slice::from_ref(sample), limit);
        self.finish(RunStatus::Failed);
        true
    }

    pub fn try_finalize(&mut self, allow_empty: bool) -> bool {
        let done = self.batch_meta.processed_batches >= self.batch_meta.total_batches
            && (self.batch_meta.total_batches > 0 || allow_empty);
        if !self.is_running() || !done {
            return false;
        }
        let status = if self.failed_jobs > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
        self.finish(status);
        true
    }

    fn finish(&mut self, status: RunStatus) {
        let now = Utc::now();
        self.status = status;
        self.finished_at = Some(now);
        self.batch_meta.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.updated_at = now;
    }
}

// =============================================================================
// Postgres store
// =============================================================================

const DURATION_MS: &str = "(EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT";

/// Append the first `GREATEST(limit - current, 0)` samples of `$samples`.
fn capped_append(samples: &str, limit: &str) -> String {
    format!(
        r#"failures || COALESCE((
            SELECT jsonb_agg(s.elem ORDER BY s.ord)
            FROM jsonb_array_elements({samples}::jsonb) WITH ORDINALITY AS s(elem, ord)
            WHERE s.ord <= GREATEST({limit} - jsonb_array_length(failures), 0)
        ), '[]'::jsonb)"#
    )
}

const LIST_FILTER: &str = r#"
    WHERE ($1::text IS NULL OR source_url = $1)
      AND ($2::text IS NULL OR status::text = $2)
      AND ($3::timestamptz IS NULL OR started_at >= $3)
      AND ($4::timestamptz IS NULL OR started_at <= $4)
      AND ($5::uuid IS NULL OR id = $5)
      AND ($6::text IS NULL
           OR source_url ILIKE $6
           OR source_name ILIKE $6
           OR id::text ILIKE $6
           OR status::text ILIKE $6)
"#;

/// Postgres-backed run store. Every mutation is one statement so that the
/// row lock orders concurrent workers.
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseRunStore for PostgresRunStore {
    async fn insert(&self, run: &NewImportRun) -> Result<ImportRun> {
        sqlx::query_as::<_, ImportRun>(
            r#"
            INSERT INTO import_runs (id, source_url, source_name, status, started_at, batch_size, concurrency)
            VALUES ($1, $2, $3, 'running', NOW(), $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&run.source_url)
        .bind(&run.source_name)
        .bind(run.batch_size)
        .bind(run.concurrency)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create import run")
    }

    async fn find(&self, run_id: Uuid) -> Result<Option<ImportRun>> {
        sqlx::query_as::<_, ImportRun>("SELECT * FROM import_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load import run")
    }

    async fn list(&self, filter: &RunFilter) -> Result<RunPage> {
        let filter = filter.clone().normalized();
        let status = filter.status.map(|s| s.as_str());
        let q = filter.q.as_ref().map(|q| format!("%{}%", q));

        let items = sqlx::query_as::<_, ImportRun>(&format!(
            "SELECT * FROM import_runs {} ORDER BY started_at DESC LIMIT $7 OFFSET $8",
            LIST_FILTER
        ))
        .bind(filter.source_url.as_deref())
        .bind(status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.run_id)
        .bind(q.as_deref())
        .bind(filter.limit)
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list import runs")?;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM import_runs {}",
            LIST_FILTER
        ))
        .bind(filter.source_url.as_deref())
        .bind(status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.run_id)
        .bind(q.as_deref())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count import runs")?;

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
        let sql = format!(
            r#"
            UPDATE import_runs
            SET total_fetched = $2,
                total_batches = $3,
                failed_jobs = failed_jobs + $4,
                failures = {},
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
            capped_append("$5", "$6")
        );

        sqlx::query_as::<_, ImportRun>(&sql)
            .bind(run_id)
            .bind(total_fetched)
            .bind(total_batches)
            .bind(invalid_count)
            .bind(Json(samples))
            .bind(sample_limit as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to record fetch outcome")
    }

    async fn fail(
        &self,
        run_id: Uuid,
        sample: &FailureSample,
        sample_limit: usize,
    ) -> Result<Option<ImportRun>> {
        let sql = format!(
            r#"
            UPDATE import_runs
            SET status = 'failed',
                finished_at = NOW(),
                duration_ms = {},
                failed_jobs = failed_jobs + 1,
                failures = {},
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING *
            "#,
            DURATION_MS,
            capped_append("$2", "$3")
        );

        sqlx::query_as::<_, ImportRun>(&sql)
            .bind(run_id)
            .bind(Json(std::slice::from_ref(sample)))
            .bind(sample_limit as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to mark import run failed")
    }

    async fn apply_batch_outcome(
        &self,
        run_id: Uuid,
        outcome: &BatchOutcome,
        sample_limit: usize,
    ) -> Result<Option<ImportRun>> {
        let sql = format!(
            r#"
            UPDATE import_runs
            SET total_imported = total_imported + $2,
                new_jobs = new_jobs + $3,
                updated_jobs = updated_jobs + $4,
                failed_jobs = failed_jobs + $5,
                attempts = attempts + 1,
                processed_batches = CASE WHEN $6 = ANY(completed_batches)
                    THEN processed_batches ELSE processed_batches + 1 END,
                completed_batches = CASE WHEN $6 = ANY(completed_batches)
                    THEN completed_batches ELSE array_append(completed_batches, $6) END,
                failures = CASE WHEN status = 'running' THEN {} ELSE failures END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
            capped_append("$7", "$8")
        );

        sqlx::query_as::<_, ImportRun>(&sql)
            .bind(run_id)
            .bind(outcome.imported)
            .bind(outcome.new_count)
            .bind(outcome.updated_count)
            .bind(outcome.failed_count)
            .bind(outcome.batch_index)
            .bind(Json(&outcome.failure_samples))
            .bind(sample_limit as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to record batch outcome")
    }

    async fn try_finalize(&self, run_id: Uuid, allow_empty: bool) -> Result<Option<ImportRun>> {
        let sql = format!(
            r#"
            UPDATE import_runs
            SET status = CASE WHEN failed_jobs > 0
                    THEN 'partial'::import_run_status
                    ELSE 'completed'::import_run_status END,
                finished_at = NOW(),
                duration_ms = {},
                updated_at = NOW()
            WHERE id = $1
              AND status = 'running'
              AND processed_batches >= total_batches
              AND (total_batches > 0 OR $2)
            RETURNING *
            "#,
            DURATION_MS
        );

        sqlx::query_as::<_, ImportRun>(&sql)
            .bind(run_id)
            .bind(allow_empty)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to finalize import run")
    }
}
