//! PostgreSQL-backed batch queue.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use super::{BatchQueue, ClaimedBatch, ErrorKind, LEASE_EXHAUSTED};

#[derive(FromRow)]
struct ClaimedRow {
    id: Uuid,
    run_id: Uuid,
    attempt: i32,
    payload: serde_json::Value,
}

pub struct PostgresBatchQueue {
    pool: PgPool,
    max_attempts: i32,
    lease_ms: i64,
}

impl PostgresBatchQueue {
    pub fn new(pool: PgPool, max_attempts: i32) -> Self {
        Self {
            pool,
            max_attempts,
            lease_ms: 5 * 60_000, // 5 minutes
        }
    }

    pub fn with_lease_duration(mut self, lease_ms: i64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    /// Expired leases that already used their last attempt are not redelivered.
    async fn dead_letter_exhausted_leases(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE import_batch_jobs
            SET status = 'dead_letter',
                dead_lettered_at = NOW(),
                error_message = $1,
                error_kind = 'retryable',
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND lease_expires_at < NOW()
              AND attempt >= max_attempts
            "#,
        )
        .bind(LEASE_EXHAUSTED)
        .execute(&self.pool)
        .await
        .context("Failed to dead-letter expired batches")?;

        let count = result.rows_affected();
        if count > 0 {
            warn!(count, "dead-lettered batches whose lease expired on the last attempt");
        }
        Ok(count)
    }
}

#[async_trait]
impl BatchQueue for PostgresBatchQueue {
    async fn enqueue(&self, run_id: Uuid, payload: serde_json::Value) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO import_batch_jobs (id, run_id, payload, status, attempt, max_attempts, run_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, NOW())
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(run_id)
        .bind(payload)
        .bind(self.max_attempts)
        .fetch_one(&self.pool)
        .await
        .context("Failed to enqueue batch")?;

        Ok(id)
    }

    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedBatch>> {
        self.dead_letter_exhausted_leases().await?;

        let rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH next_batches AS (
                SELECT id
                FROM import_batch_jobs
                WHERE
                    (status IN ('pending', 'failed') AND run_at <= NOW())
                    OR (status = 'running' AND lease_expires_at < NOW() AND attempt < max_attempts)
                ORDER BY run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE import_batch_jobs
            SET
                status = 'running',
                attempt = attempt + 1,
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                worker_id = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_batches)
            RETURNING id, run_id, attempt, payload
            "#,
        )
        .bind(limit)
        .bind(self.lease_ms.to_string())
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to claim batches")?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedBatch {
                id: row.id,
                run_id: row.run_id,
                attempt: row.attempt,
                payload: row.payload,
            })
            .collect())
    }

    async fn mark_succeeded(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_batch_jobs
            SET status = 'succeeded',
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark batch succeeded")?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE import_batch_jobs
            SET status = CASE WHEN $3 AND attempt < max_attempts
                    THEN 'failed'::batch_job_status
                    ELSE 'dead_letter'::batch_job_status END,
                run_at = CASE WHEN $3 AND attempt < max_attempts
                    THEN NOW() + make_interval(secs => LEAST(2 * power(2, attempt - 1), 3600))
                    ELSE run_at END,
                dead_lettered_at = CASE WHEN $3 AND attempt < max_attempts
                    THEN NULL ELSE NOW() END,
                error_message = $2,
                error_kind = $4,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING status::text
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(kind.should_retry())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to mark batch failed")?;

        match status.as_deref() {
            Some("dead_letter") => {
                warn!(batch_job_id = %id, error = %error, "batch dead-lettered")
            }
            Some(_) => info!(batch_job_id = %id, "batch scheduled for retry"),
            None => warn!(batch_job_id = %id, "mark_failed on unknown batch"),
        }

        Ok(())
    }
}
