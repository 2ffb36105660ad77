//! In-process fan-out of run-changed events to live viewers.
//!
//! Every event goes to the firehose and to the channel keyed by its run, so a
//! viewer can follow all runs or a single one:
//!
//! ```text
//! publish("import_runs:<id>", event)
//!     ├─► firehose            → subscribe_all()
//!     └─► keyed channel <id>  → subscribe("import_runs:<id>")
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Cloneable pub/sub hub. Payloads are `serde_json::Value`; producers
/// serialize their own event types.
#[derive(Clone)]
pub struct StreamHub {
    firehose: broadcast::Sender<serde_json::Value>,
    keyed: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            firehose: broadcast::channel(capacity).0,
            keyed: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Send to the firehose and to `key`'s subscribers. Nobody listening is fine.
    pub async fn publish(&self, key: &str, value: serde_json::Value) {
        let keyed = self.keyed.read().await;
        if let Some(tx) = keyed.get(key) {
            let _ = tx.send(value.clone());
        }
        let _ = self.firehose.send(value);
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<serde_json::Value> {
        self.firehose.subscribe()
    }

    pub async fn subscribe(&self, key: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut keyed = self.keyed.write().await;
        keyed
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop keyed channels nobody listens to anymore.
    pub async fn cleanup(&self) {
        self.keyed
            .write()
            .await
            .retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}
