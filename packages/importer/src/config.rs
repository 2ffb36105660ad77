use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::feeds::models::FeedSource;

/// Tuning knobs consumed by the import pipeline.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub worker_concurrency: usize,
    pub failure_sample_limit: usize,
    pub http_timeout: Duration,
    pub lock_ttl: Duration,
    pub batch_max_attempts: i32,
    pub interval: Duration,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            worker_concurrency: 5,
            failure_sample_limit: 50,
            http_timeout: Duration::from_millis(20_000),
            lock_ttl: Duration::from_secs(900),
            batch_max_attempts: 3,
            interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub import: ImportSettings,
    pub run_scheduler: bool,
    pub run_workers: bool,
    pub feed_sources: Vec<FeedSource>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
            bail!("DATABASE_URL must start with postgres:// or postgresql://");
        }

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        if !redis_url.starts_with("redis://") && !redis_url.starts_with("rediss://") {
            bail!("REDIS_URL must be a Redis connection string like redis://...");
        }

        let import = ImportSettings {
            batch_size: positive("BATCH_SIZE", 100)?,
            worker_concurrency: positive("WORKER_CONCURRENCY", 5)?,
            failure_sample_limit: var_or("FAILURE_SAMPLE_LIMIT", 50)?,
            http_timeout: Duration::from_millis(positive("HTTP_TIMEOUT_MS", 20_000)?),
            lock_ttl: Duration::from_secs(positive("RUN_LOCK_TTL_SEC", 900)?),
            batch_max_attempts: positive("BATCH_MAX_ATTEMPTS", 3)?,
            interval: Duration::from_secs(60 * positive::<u64>("IMPORT_INTERVAL_MINUTES", 60)?),
        };

        let feed_sources = match env::var("FEED_SOURCES") {
            Ok(raw) if !raw.trim().is_empty() => FeedSource::parse_list(&raw)
                .context("FEED_SOURCES must be a JSON array of {url, sourceName}")?,
            _ => FeedSource::defaults(),
        };

        Ok(Self {
            database_url,
            redis_url,
            port: var_or("PORT", 8080)?,
            import,
            run_scheduler: var_or("RUN_SCHEDULER", true)?,
            run_workers: var_or("RUN_WORKERS", true)?,
            feed_sources,
        })
    }
}

fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid value", key)),
        Err(_) => Ok(default),
    }
}

fn positive<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = var_or(key, default)?;
    if value <= T::default() {
        bail!("{} must be greater than zero", key);
    }
    Ok(value)
}
