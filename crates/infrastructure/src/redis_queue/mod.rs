pub mod connection_manager;

use async_trait::async_trait;
use mealprep_core::{MealPrepResult, QueueConfig};
use mealprep_domain::{MessageId, QueueMessage, QueueStore};
use metrics::{counter, histogram};
use redis::AsyncCommands;
use std::time::Instant;
use tracing::{debug, instrument};

pub use connection_manager::{map_redis_error, RedisConnectionManager};

/// Redis list backed queue: `RPUSH` at the tail, `LPOP` from the head.
pub struct RedisQueueStore {
    connections: RedisConnectionManager,
}

impl RedisQueueStore {
    pub fn new(config: &QueueConfig) -> MealPrepResult<Self> {
        Ok(Self {
            connections: RedisConnectionManager::new(&config.url, config.connection_timeout())?,
        })
    }

    pub async fn ping(&self) -> MealPrepResult<()> {
        self.connections.ping().await
    }

    /// Drop the cached connection
    pub async fn close(&self) {
        self.connections.reset().await;
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, queue: &str, message: &QueueMessage) -> MealPrepResult<MessageId> {
        self.push_raw(queue, message.encode()?).await?;
        Ok(message.job_id.clone())
    }

    #[instrument(skip(self, raw), fields(queue = %queue))]
    async fn push_raw(&self, queue: &str, raw: String) -> MealPrepResult<()> {
        let start = Instant::now();
        let mut conn = self.connections.get().await?;
        let length: usize = conn.rpush(queue, raw).await.map_err(map_redis_error)?;
        histogram!("mealprep_queue_push_duration_ms").record(start.elapsed().as_millis() as f64);
        counter!("mealprep_queue_pushed_total", "queue" => queue.to_string()).increment(1);
        debug!(length, "消息入队");
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> MealPrepResult<Option<String>> {
        let mut conn = self.connections.get().await?;
        let raw: Option<String> = conn.lpop(queue, None).await.map_err(map_redis_error)?;
        if raw.is_some() {
            counter!("mealprep_queue_popped_total", "queue" => queue.to_string()).increment(1);
        }
        Ok(raw)
    }

    async fn peek(&self, queue: &str) -> MealPrepResult<Option<String>> {
        let mut conn = self.connections.get().await?;
        conn.lindex(queue, 0).await.map_err(map_redis_error)
    }

    async fn length(&self, queue: &str) -> MealPrepResult<usize> {
        let mut conn = self.connections.get().await?;
        conn.llen(queue).await.map_err(map_redis_error)
    }

    async fn clear(&self, queue: &str) -> MealPrepResult<()> {
        let mut conn = self.connections.get().await?;
        let _: usize = conn.del(queue).await.map_err(map_redis_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn remove_by_id(&self, queue: &str, id: &str) -> MealPrepResult<bool> {
        let mut conn = self.connections.get().await?;
        let entries: Vec<String> = conn.lrange(queue, 0, -1).await.map_err(map_redis_error)?;

        let Some(raw) = entries
            .into_iter()
            .find(|raw| QueueMessage::peek_job_id(raw).as_deref() == Some(id))
        else {
            return Ok(false);
        };

        let removed: usize = conn.lrem(queue, 1, raw).await.map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn snapshot(&self, queue: &str) -> MealPrepResult<Vec<String>> {
        let mut conn = self.connections.get().await?;
        conn.lrange(queue, 0, -1).await.map_err(map_redis_error)
    }
}
