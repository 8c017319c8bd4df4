//! Fast lane - redis-backed volatile queue
//!
//! Used for work that is cheap to lose across a restart: profile-picture
//! fetches, fan-out nudges, recomputation hints. The same connection also
//! serves short-lived dispatcher caches.

use flowchat_common::{Error, Result};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

/// Fast lane over redis lists
#[derive(Clone)]
pub struct FastLane {
    client: redis::Client,
}

impl FastLane {
    /// Connect the fast lane
    pub fn new(cache_url: &str) -> Result<Self> {
        let client = redis::Client::open(cache_url)
            .map_err(|e| Error::Cache(format!("Failed to open redis: {}", e)))?;
        info!("Fast lane connected");
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Cache(format!("Redis connection failed: {}", e)))
    }

    fn queue_key(queue: &str) -> String {
        format!("flowchat:queue:{}", queue)
    }

    /// Push a task onto a fast queue
    pub async fn push<T: Serialize>(&self, queue: &str, task: &T) -> Result<()> {
        let payload = serde_json::to_string(task)
            .map_err(|e| Error::Internal(format!("Failed to serialize task: {}", e)))?;

        let mut conn = self.conn().await?;
        conn.lpush::<_, _, ()>(Self::queue_key(queue), payload)
            .await
            .map_err(|e| Error::Cache(format!("Redis push failed: {}", e)))?;

        debug!(queue, "Fast task queued");
        Ok(())
    }

    /// Pop the next task, blocking up to `timeout_secs`. Returns None on
    /// timeout.
    pub async fn pop<T: DeserializeOwned>(
        &self,
        queue: &str,
        timeout_secs: f64,
    ) -> Result<Option<T>> {
        let mut conn = self.conn().await?;
        let result: Option<(String, String)> = conn
            .brpop(Self::queue_key(queue), timeout_secs)
            .await
            .map_err(|e| Error::Cache(format!("Redis pop failed: {}", e)))?;

        match result {
            Some((_, payload)) => {
                let task = serde_json::from_str(&payload)
                    .map_err(|e| Error::Internal(format!("Bad task payload: {}", e)))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Set a cache value with a TTL
    pub async fn cache_set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(format!("flowchat:cache:{}", key), value, ttl_secs)
            .await
            .map_err(|e| Error::Cache(format!("Redis set failed: {}", e)))?;
        Ok(())
    }

    /// Get a cache value
    pub async fn cache_get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(format!("flowchat:cache:{}", key))
            .await
            .map_err(|e| Error::Cache(format!("Redis get failed: {}", e)))
    }

    /// Delete a cache value
    pub async fn cache_del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(format!("flowchat:cache:{}", key))
            .await
            .map_err(|e| Error::Cache(format!("Redis del failed: {}", e)))?;
        Ok(())
    }
}
