use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::ReasonCode;

/// A bounded, redacted record of one rejected item or batch-level error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    pub reason_code: ReasonCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl FailureSample {
    pub fn new(reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            dedupe_key: None,
            reason_code,
            message: message.into(),
            sample: None,
            at: Utc::now(),
        }
    }

    pub fn with_dedupe_key(mut self, dedupe_key: Option<String>) -> Self {
        self.dedupe_key = dedupe_key;
        self
    }

    pub fn with_sample(mut self, sample: impl Serialize) -> Self {
        self.sample = serde_json::to_value(sample).ok();
        self
    }
}

/// What one batch attempt contributes to its run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub batch_index: i64,
    pub imported: i64,
    pub new_count: i64,
    pub updated_count: i64,
    pub failed_count: i64,
    pub failure_samples: Vec<FailureSample>,
}
