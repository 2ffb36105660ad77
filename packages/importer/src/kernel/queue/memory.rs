//! In-memory batch queue with the same delivery semantics as the Postgres one.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{retry_delay, BatchJobStatus, BatchQueue, ClaimedBatch, ErrorKind, LEASE_EXHAUSTED};

#[derive(Debug, Clone)]
struct Entry {
    id: Uuid,
    run_id: Uuid,
    payload: serde_json::Value,
    status: BatchJobStatus,
    attempt: i32,
    run_at: Instant,
    lease_expires_at: Option<Instant>,
    last_error: Option<String>,
}

impl Entry {
    fn lease_expired(&self, now: Instant) -> bool {
        self.status == BatchJobStatus::Running && self.lease_expires_at.is_some_and(|exp| exp < now)
    }

    fn is_ready(&self, now: Instant, max_attempts: i32) -> bool {
        match self.status {
            BatchJobStatus::Pending | BatchJobStatus::Failed => self.run_at <= now,
            BatchJobStatus::Running => self.lease_expired(now) && self.attempt < max_attempts,
            BatchJobStatus::Succeeded | BatchJobStatus::DeadLetter => false,
        }
    }
}

/// A dead-lettered batch and the error that put it there.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub run_id: Uuid,
    pub attempt: i32,
    pub error: Option<String>,
}

pub struct MemoryBatchQueue {
    entries: Mutex<Vec<Entry>>,
    max_attempts: i32,
    lease: Duration,
    backoff: bool,
}

impl MemoryBatchQueue {
    /// Retries become ready immediately; use [`Self::with_backoff`] for real delays.
    pub fn new(max_attempts: i32) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_attempts,
            lease: Duration::from_secs(300),
            backoff: false,
        }
    }

    pub fn with_backoff(mut self) -> Self {
        self.backoff = true;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, Vec<Entry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("batch queue poisoned"))
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches not yet succeeded or dead-lettered.
    pub fn outstanding(&self) -> usize {
        self.entries()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| {
                        !matches!(
                            e.status,
                            BatchJobStatus::Succeeded | BatchJobStatus::DeadLetter
                        )
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.entries()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.status == BatchJobStatus::DeadLetter)
                    .map(|e| DeadLetter {
                        id: e.id,
                        run_id: e.run_id,
                        attempt: e.attempt,
                        error: e.last_error.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Payloads in enqueue order, regardless of status.
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.entries()
            .map(|entries| entries.iter().map(|e| e.payload.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BatchQueue for MemoryBatchQueue {
    async fn enqueue(&self, run_id: Uuid, payload: serde_json::Value) -> Result<Uuid> {
        let id = Uuid::now_v7();
        self.entries()?.push(Entry {
            id,
            run_id,
            payload,
            status: BatchJobStatus::Pending,
            attempt: 0,
            run_at: Instant::now(),
            lease_expires_at: None,
            last_error: None,
        });
        Ok(id)
    }

    async fn claim(&self, _worker_id: &str, limit: i64) -> Result<Vec<ClaimedBatch>> {
        let now = Instant::now();
        let lease = self.lease;
        let max_attempts = self.max_attempts;
        let mut entries = self.entries()?;

        for entry in entries
            .iter_mut()
            .filter(|e| e.lease_expired(now) && e.attempt >= max_attempts)
        {
            entry.status = BatchJobStatus::DeadLetter;
            entry.lease_expires_at = None;
            entry.last_error = Some(LEASE_EXHAUSTED.to_string());
        }

        Ok(entries
            .iter_mut()
            .filter(|e| e.is_ready(now, max_attempts))
            .take(limit.max(0) as usize)
            .map(|e| {
                e.status = BatchJobStatus::Running;
                e.attempt += 1;
                e.lease_expires_at = Some(now + lease);
                ClaimedBatch {
                    id: e.id,
                    run_id: e.run_id,
                    attempt: e.attempt,
                    payload: e.payload.clone(),
                }
            })
            .collect())
    }

    async fn mark_succeeded(&self, id: Uuid) -> Result<()> {
        let mut entries = self.entries()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow!("unknown batch {}", id))?;
        entry.status = BatchJobStatus::Succeeded;
        entry.lease_expires_at = None;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str, kind: ErrorKind) -> Result<()> {
        let max_attempts = self.max_attempts;
        let backoff = self.backoff;
        let mut entries = self.entries()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow!("unknown batch {}", id))?;

        entry.last_error = Some(error.to_string());
        entry.lease_expires_at = None;
        if kind.should_retry() && entry.attempt < max_attempts {
            entry.status = BatchJobStatus::Failed;
            entry.run_at = if backoff {
                Instant::now() + retry_delay(entry.attempt)
            } else {
                Instant::now()
            };
        } else {
            entry.status = BatchJobStatus::DeadLetter;
        }
        Ok(())
    }
}
