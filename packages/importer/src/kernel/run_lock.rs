//! Run lock - at most one holder per key, self-healing through a TTL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::BaseRunLock;

/// Lock key guarding a full sweep across all sources.
pub const SWEEP_LOCK_KEY: &str = "job-import:sweep-lock";

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<tokio::sync::Mutex<ConnectionManager>>;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed lock: `SET key token NX EX ttl`, released by a
/// compare-then-delete script.
pub struct RedisRunLock {
    manager: SharedConnectionManager,
}

impl RedisRunLock {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self { manager }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).context("failed to construct Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        Ok(Self::new(Arc::new(tokio::sync::Mutex::new(manager))))
    }
}

#[async_trait]
impl BaseRunLock for RedisRunLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>> {
        let token = Uuid::new_v4().to_string();
        let mut conn = self.manager.lock().await;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire lock {}", key))?;

        debug!(key = %key, acquired = reply.is_some(), "lock acquire");
        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.manager.lock().await;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut *conn)
            .await
            .with_context(|| format!("failed to release lock {}", key))?;
        Ok(deleted == 1)
    }
}

/// In-process lock with the same contract, for tests and single-node runs.
#[derive(Default)]
pub struct MemoryRunLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryRunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.get(key).is_some_and(|(_, exp)| *exp > Instant::now()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl BaseRunLock for MemoryRunLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<String>> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| anyhow::anyhow!("lock table poisoned"))?;
        let now = Instant::now();
        if held.get(key).is_some_and(|(_, exp)| *exp > now) {
            return Ok(None);
        }
        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| anyhow::anyhow!("lock table poisoned"))?;
        match held.get(key) {
            Some((owner, _)) if owner == token => {
                held.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
