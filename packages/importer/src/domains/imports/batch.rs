//! Batch envelope - what the runner enqueues and the worker consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::common::ImportError;
use crate::domains::jobs::models::JobCandidate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub run_id: Uuid,
    pub source_url: String,
    pub source_name: String,
    pub batch_index: i64,
    pub total_batches: i64,
    pub jobs: Vec<JobCandidate>,
}

impl Batch {
    pub fn to_payload(&self) -> Result<Value, ImportError> {
        serde_json::to_value(self)
            .map_err(|e| ImportError::Other(anyhow::anyhow!("failed to serialize batch: {}", e)))
    }

    /// Decode a queue payload. Missing envelope fields are a contract
    /// violation and fail the whole batch; malformed job entries become empty
    /// candidates so they are counted as invalid.
    pub fn from_payload(payload: &Value) -> Result<Self, ImportError> {
        let envelope = payload
            .as_object()
            .ok_or_else(|| ImportError::validation("Invalid batch envelope: not an object"))?;

        let text = |field: &str| -> Result<String, ImportError> {
            envelope
                .get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    ImportError::validation(format!("Invalid batch envelope: {} missing", field))
                })
        };

        let run_id = text("runId")?
            .parse::<Uuid>()
            .map_err(|_| ImportError::validation("Invalid batch envelope: runId is not a uuid"))?;
        let source_url = text("sourceUrl")?;
        let source_name = text("sourceName")?;
        let jobs = envelope
            .get("jobs")
            .and_then(Value::as_array)
            .ok_or_else(|| ImportError::validation("Invalid batch envelope: jobs missing"))?;

        Ok(Self {
            run_id,
            source_url,
            source_name,
            batch_index: envelope.get("batchIndex").and_then(Value::as_i64).unwrap_or(0),
            total_batches: envelope
                .get("totalBatches")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            jobs: jobs
                .iter()
                .map(|job| serde_json::from_value(job.clone()).unwrap_or_default())
                .collect(),
        })
    }
}
