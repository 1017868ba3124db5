use async_trait::async_trait;
use mealprep_core::MealPrepResult;
use serde::{Deserialize, Serialize};

/// Connection pool counters sampled by the health monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Open connections
    pub size: u32,
    /// Upper bound the pool may grow to
    pub max_size: u32,
    /// Connections that can be handed out without waiting
    pub available: u32,
    /// Callers currently waiting for a connection
    pub pending: u32,
}

/// Document store the supervisor protects
#[async_trait]
pub trait BackingStore: Send + Sync {
    fn name(&self) -> &str;
    async fn is_connected(&self) -> bool;
    /// Open the pool; `None` uses the configured size
    async fn connect(&self, pool_size: Option<u32>) -> MealPrepResult<()>;
    async fn disconnect(&self);
    async fn ping(&self) -> MealPrepResult<()>;
    async fn pool_stats(&self) -> PoolStats;
}
