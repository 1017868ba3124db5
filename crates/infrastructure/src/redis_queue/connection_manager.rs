use mealprep_core::{MealPrepError, MealPrepResult};
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Lazily created, cached multiplexed connection to Redis
pub struct RedisConnectionManager {
    client: Client,
    connect_timeout: Duration,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisConnectionManager {
    pub fn new(url: &str, connect_timeout: Duration) -> MealPrepResult<Self> {
        let client = Client::open(url)
            .map_err(|e| MealPrepError::Configuration(format!("无效的Redis地址 {url}: {e}")))?;
        Ok(Self {
            client,
            connect_timeout,
            connection: Mutex::new(None),
        })
    }

    /// Cached connection, established on first use
    pub async fn get(&self) -> MealPrepResult<ConnectionManager> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let connect = ConnectionManager::new(self.client.clone());
        let conn = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("连接Redis失败: {e}");
                return Err(map_redis_error(e));
            }
            Err(_) => {
                warn!("连接Redis超时");
                return Err(MealPrepError::StoreUnavailable("连接Redis超时".to_string()));
            }
        };
        debug!("Redis连接已建立");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects
    pub async fn reset(&self) {
        self.connection.lock().await.take();
    }

    pub async fn ping(&self) -> MealPrepResult<()> {
        let mut conn = self.get().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}

/// Transport failures become `StoreUnavailable`; command errors stay `Redis`
pub fn map_redis_error(e: redis::RedisError) -> MealPrepError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped()
    {
        MealPrepError::StoreUnavailable(format!("Redis不可用: {e}"))
    } else {
        MealPrepError::Redis(e)
    }
}
