//! Batch queue - at-least-once delivery of batches to workers.
//!
//! # Lifecycle
//!
//! ```text
//! enqueue ──► pending ──claim──► running ──► succeeded
//!                ▲                  │
//!                │   retryable &    ├──► failed (backoff) ──claim──► running
//!                │   attempts left  │
//!                └── lease expired ─┘
//!                                   └──► dead_letter (non-retryable or exhausted)
//! ```

mod memory;
mod postgres;
mod worker;

pub use memory::{DeadLetter, MemoryBatchQueue};
pub use postgres::PostgresBatchQueue;
pub use worker::{BatchHandler, BatchWorkerPool, WorkerPoolConfig};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Longest wait between two attempts of one batch.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Error recorded on a batch whose lease expired during its last attempt.
pub const LEASE_EXHAUSTED: &str = "lease expired after max attempts";

/// Classifies errors for retry decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - dead-lettered immediately
    NonRetryable,
    /// Interrupted by graceful shutdown - will retry
    Shutdown,
}

impl ErrorKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::Shutdown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::NonRetryable => "non_retryable",
            ErrorKind::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
}

/// A batch handed to exactly one worker until its lease expires.
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    pub id: Uuid,
    pub run_id: Uuid,
    /// 1 on first delivery.
    pub attempt: i32,
    pub payload: serde_json::Value,
}

/// Exponential backoff: 2s, 4s, 8s, ... capped at one hour.
pub fn retry_delay(attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 20) as u32;
    Duration::from_secs(2u64 << exponent).min(MAX_RETRY_DELAY)
}

#[async_trait]
pub trait BatchQueue: Send + Sync {
    async fn enqueue(&self, run_id: Uuid, payload: serde_json::Value) -> Result<Uuid>;

    /// Claim up to `limit` ready batches, including ones whose lease expired.
    async fn claim(&self, worker_id: &str, limit: i64) -> Result<Vec<ClaimedBatch>>;

    async fn mark_succeeded(&self, id: Uuid) -> Result<()>;

    /// Schedule a retry with backoff, or dead-letter when the error is not
    /// retryable or attempts are exhausted.
    async fn mark_failed(&self, id: Uuid, error: &str, kind: ErrorKind) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(2), Duration::from_secs(4));
        assert_eq!(retry_delay(3), Duration::from_secs(8));
        assert_eq!(retry_delay(30), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_only_non_retryable_skips_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(ErrorKind::Shutdown.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }
}
