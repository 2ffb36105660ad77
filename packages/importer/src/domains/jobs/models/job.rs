//! Job postings - candidates produced by the normalizer and the persisted record.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

use crate::kernel::BaseJobStore;

/// A normalized posting that has not been validated yet.
///
/// Every field is optional so that a candidate can carry exactly what the feed
/// provided; [`JobCandidate::validate`] decides whether it is persistable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobCandidate {
    pub source_url: Option<String>,
    pub source_name: Option<String>,
    pub external_id: Option<String>,
    pub job_url: Option<String>,
    pub dedupe_key: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub job_type: Option<String>,
    pub region: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Field-level validation outcome. Never an error by itself; callers decide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The subset of a posting shown in failure samples. Never the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedJob {
    pub title: Option<String>,
    pub job_url: Option<String>,
    pub dedupe_key: Option<String>,
    pub source_url: Option<String>,
}

impl JobCandidate {
    pub fn validate(&self) -> ValidationReport {
        let required = [
            ("sourceUrl", &self.source_url),
            ("sourceName", &self.source_name),
            ("title", &self.title),
            ("jobUrl", &self.job_url),
            ("dedupeKey", &self.dedupe_key),
        ];

        let errors = required
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(field, _)| format!("{} missing", field))
            .collect();

        ValidationReport { errors }
    }

    /// Convert into a persistable upsert, or return the validation report.
    pub fn into_upsert(self) -> Result<JobUpsert, ValidationReport> {
        let report = self.validate();
        let (Some(source_url), Some(source_name), Some(title), Some(job_url), Some(dedupe_key)) = (
            self.source_url,
            self.source_name,
            self.title,
            self.job_url,
            self.dedupe_key,
        ) else {
            return Err(report);
        };
        if !report.is_ok() {
            return Err(report);
        }

        Ok(JobUpsert {
            dedupe_key,
            source_url,
            source_name,
            external_id: self.external_id,
            job_url,
            title,
            company: self.company,
            location: self.location,
            description: self.description,
            categories: self.categories,
            job_type: self.job_type,
            region: self.region,
            published_at: self.published_at,
        })
    }

    pub fn redacted(&self) -> RedactedJob {
        RedactedJob {
            title: self.title.clone(),
            job_url: self.job_url.clone(),
            dedupe_key: self.dedupe_key.clone(),
            source_url: self.source_url.clone(),
        }
    }
}

/// A validated posting ready for the idempotent upsert keyed by `dedupe_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpsert {
    pub dedupe_key: String,
    pub source_url: String,
    pub source_name: String,
    pub external_id: Option<String>,
    pub job_url: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub job_type: Option<String>,
    pub region: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Collapse postings sharing a dedupe key, keeping the last occurrence's
/// values at the position of the first occurrence.
pub fn collapse_by_dedupe_key(jobs: Vec<JobUpsert>) -> Vec<JobUpsert> {
    let mut out: Vec<JobUpsert> = Vec::with_capacity(jobs.len());
    for job in jobs {
        match out.iter_mut().find(|j| j.dedupe_key == job.dedupe_key) {
            Some(existing) => *existing = job,
            None => out.push(job),
        }
    }
    out
}

/// Persisted job posting.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub dedupe_key: String,
    pub source_url: String,
    pub source_name: String,
    pub external_id: Option<String>,
    pub job_url: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub categories: Json<Vec<String>>,
    pub job_type: Option<String>,
    pub region: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub async fn find_by_dedupe_key(dedupe_key: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM jobs WHERE dedupe_key = $1")
            .bind(dedupe_key)
            .fetch_optional(pool)
            .await
            .context("Failed to load job by dedupe key")
    }
}

/// Postgres-backed job store.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseJobStore for PostgresJobStore {
    async fn existing_keys(&self, keys: &[String]) -> Result<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let rows: Vec<String> =
            sqlx::query_scalar("SELECT dedupe_key FROM jobs WHERE dedupe_key = ANY($1)")
                .bind(keys)
                .fetch_all(&self.pool)
                .await
                .context("Failed to look up existing dedupe keys")?;

        Ok(rows.into_iter().collect())
    }

    async fn bulk_upsert(&self, jobs: &[JobUpsert]) -> Result<u64> {
        if jobs.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = jobs.iter().map(|_| Uuid::now_v7()).collect();
        let dedupe_keys: Vec<&str> = jobs.iter().map(|j| j.dedupe_key.as_str()).collect();
        let source_urls: Vec<&str> = jobs.iter().map(|j| j.source_url.as_str()).collect();
        let source_names: Vec<&str> = jobs.iter().map(|j| j.source_name.as_str()).collect();
        let external_ids: Vec<Option<&str>> =
            jobs.iter().map(|j| j.external_id.as_deref()).collect();
        let job_urls: Vec<&str> = jobs.iter().map(|j| j.job_url.as_str()).collect();
        let titles: Vec<&str> = jobs.iter().map(|j| j.title.as_str()).collect();
        let companies: Vec<Option<&str>> = jobs.iter().map(|j| j.company.as_deref()).collect();
        let locations: Vec<Option<&str>> = jobs.iter().map(|j| j.location.as_deref()).collect();
        let descriptions: Vec<Option<&str>> =
            jobs.iter().map(|j| j.description.as_deref()).collect();
        let categories: Vec<serde_json::Value> = jobs
            .iter()
            .map(|j| serde_json::json!(j.categories))
            .collect();
        let job_types: Vec<Option<&str>> = jobs.iter().map(|j| j.job_type.as_deref()).collect();
        let regions: Vec<Option<&str>> = jobs.iter().map(|j| j.region.as_deref()).collect();
        let published: Vec<Option<DateTime<Utc>>> = jobs.iter().map(|j| j.published_at).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, dedupe_key, source_url, source_name, external_id, job_url, title,
                company, location, description, categories, job_type, region, published_at,
                created_at, updated_at
            )
            SELECT t.*, NOW(), NOW()
            FROM UNNEST(
                $1::uuid[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[], $7::text[],
                $8::text[], $9::text[], $10::text[], $11::jsonb[], $12::text[], $13::text[],
                $14::timestamptz[]
            ) AS t(
                id, dedupe_key, source_url, source_name, external_id, job_url, title,
                company, location, description, categories, job_type, region, published_at
            )
            ON CONFLICT (dedupe_key) DO UPDATE
            SET source_url = EXCLUDED.source_url,
                source_name = EXCLUDED.source_name,
                external_id = EXCLUDED.external_id,
                job_url = EXCLUDED.job_url,
                title = EXCLUDED.title,
                company = EXCLUDED.company,
                location = EXCLUDED.location,
                description = EXCLUDED.description,
                categories = EXCLUDED.categories,
                job_type = EXCLUDED.job_type,
                region = EXCLUDED.region,
                published_at = EXCLUDED.published_at,
                updated_at = NOW()
            "#,
        )
        .bind(&ids)
        .bind(&dedupe_keys)
        .bind(&source_urls)
        .bind(&source_names)
        .bind(&external_ids)
        .bind(&job_urls)
        .bind(&titles)
        .bind(&companies)
        .bind(&locations)
        .bind(&descriptions)
        .bind(&categories)
        .bind(&job_types)
        .bind(&regions)
        .bind(&published)
        .execute(&self.pool)
        .await
        .context("Failed to bulk upsert jobs")?;

        Ok(result.rows_affected())
    }
}
