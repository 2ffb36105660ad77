//! Run-changed notifications published on every RunTracker mutation.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::models::ImportRun;
use crate::kernel::StreamHub;

/// Topic carrying every run's changes.
pub const RUNS_TOPIC: &str = "import_runs";

/// SSE event name for a run change.
pub const RUN_CHANGED_EVENT: &str = "import_run";

pub fn run_topic(run_id: Uuid) -> String {
    format!("{}:{}", RUNS_TOPIC, run_id)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRunChanged<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub run: &'a ImportRun,
}

impl<'a> ImportRunChanged<'a> {
    pub fn new(run: &'a ImportRun) -> Self {
        Self {
            kind: RUN_CHANGED_EVENT,
            run,
        }
    }

    pub fn to_json(&self) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(run_id = %self.run.id, error = %e, "failed to serialize run event");
                None
            }
        }
    }
}

pub async fn publish_run_changed(hub: &StreamHub, run: &ImportRun) {
    if let Some(value) = ImportRunChanged::new(run).to_json() {
        hub.publish(&run_topic(run.id), value).await;
    }
}
