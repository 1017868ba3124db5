use async_trait::async_trait;
use mealprep_core::{DatabaseConfig, MealPrepError, MealPrepResult};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::migrations::run_migrations;
use crate::resilience::{BackingStore, PoolStats};

/// Process-wide SQLite pool holder.
///
/// Starts disconnected; the pool can be closed and reopened with a different
/// size while repositories keep their `Arc<DatabaseManager>`.
pub struct DatabaseManager {
    config: DatabaseConfig,
    pool: RwLock<Option<SqlitePool>>,
    max_size: AtomicU32,
    waiting: Arc<AtomicUsize>,
}

struct WaitGuard(Arc<AtomicUsize>);

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DatabaseManager {
    pub fn new(config: DatabaseConfig) -> Self {
        let max_size = config.max_connections;
        Self {
            config,
            pool: RwLock::new(None),
            max_size: AtomicU32::new(max_size),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open the pool with the configured size and run migrations
    pub async fn connect(&self) -> MealPrepResult<()> {
        self.open(self.config.max_connections).await
    }

    async fn open(&self, size: u32) -> MealPrepResult<()> {
        let size = size.max(1);
        let options = SqliteConnectOptions::from_str(&self.config.url)
            .map_err(|e| MealPrepError::Configuration(format!("无效的数据库URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(size)
            .min_connections(self.config.min_connections.min(size))
            .acquire_timeout(self.config.connection_timeout())
            .idle_timeout(self.config.idle_timeout())
            .connect_with(options)
            .await
            .map_err(|e| MealPrepError::StoreUnavailable(format!("数据库连接失败: {e}")))?;

        run_migrations(&pool).await?;

        let previous = self.pool.write().await.replace(pool);
        if let Some(old) = previous {
            old.close().await;
        }
        self.max_size.store(size, Ordering::SeqCst);
        info!(url = %self.config.url, pool_size = size, "数据库连接池已建立");
        Ok(())
    }

    /// Current pool handle, or `StoreUnavailable` while disconnected
    pub async fn pool(&self) -> MealPrepResult<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| MealPrepError::StoreUnavailable("数据库未连接".to_string()))
    }

    /// Check out a connection, counted as pending while waiting
    pub async fn acquire(&self) -> MealPrepResult<PoolConnection<Sqlite>> {
        let pool = self.pool().await?;
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitGuard(self.waiting.clone());
        Ok(pool.acquire().await?)
    }

    pub async fn health_check(&self) -> MealPrepResult<()> {
        let mut conn = self.acquire().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            debug!("数据库连接池已关闭");
        }
    }
}

#[async_trait]
impl BackingStore for DatabaseManager {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn is_connected(&self) -> bool {
        matches!(self.pool.read().await.as_ref(), Some(pool) if !pool.is_closed())
    }

    async fn connect(&self, pool_size: Option<u32>) -> MealPrepResult<()> {
        self.open(pool_size.unwrap_or(self.config.max_connections))
            .await
    }

    async fn disconnect(&self) {
        self.close().await;
    }

    async fn ping(&self) -> MealPrepResult<()> {
        self.health_check().await
    }

    async fn pool_stats(&self) -> PoolStats {
        let max_size = self.max_size.load(Ordering::SeqCst);
        let pending = self.waiting.load(Ordering::SeqCst) as u32;
        match self.pool.read().await.as_ref() {
            Some(pool) if !pool.is_closed() => {
                let size = pool.size();
                let idle = pool.num_idle() as u32;
                PoolStats {
                    size,
                    max_size,
                    available: idle + max_size.saturating_sub(size),
                    pending,
                }
            }
            _ => PoolStats {
                max_size,
                pending,
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("jobs.db").display()),
            max_connections: 4,
            min_connections: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(temp_config(&dir));

        assert!(!manager.is_connected().await);
        assert!(matches!(
            manager.acquire().await,
            Err(MealPrepError::StoreUnavailable(_))
        ));
        assert_eq!(manager.pool_stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_connect_ping_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(temp_config(&dir));

        manager.connect().await.unwrap();
        assert!(manager.is_connected().await);
        manager.ping().await.unwrap();

        let stats = manager.pool_stats().await;
        assert_eq!(stats.max_size, 4);
        assert!(stats.available >= 1);
        assert_eq!(stats.pending, 0);

        manager.disconnect().await;
        assert!(!manager.is_connected().await);
        assert!(manager.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_reconnect_with_wider_pool() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(temp_config(&dir));
        manager.connect().await.unwrap();

        BackingStore::connect(&manager, Some(9)).await.unwrap();
        assert_eq!(manager.pool_stats().await.max_size, 9);
        manager.ping().await.unwrap();
    }
}
