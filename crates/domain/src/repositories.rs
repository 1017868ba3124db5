//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use mealprep_core::MealPrepResult;

use crate::entities::{Job, JobFilter};

/// 任务仓储抽象. Storage only; state rules live in [`crate::ledger::JobLedger`].
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> MealPrepResult<Job>;
    async fn find(&self, id: &str) -> MealPrepResult<Option<Job>>;
    /// Overwrite an existing record; `NotFound` when the id is unknown
    async fn save(&self, job: &Job) -> MealPrepResult<Job>;
    /// Newest first
    async fn list(&self, filter: &JobFilter) -> MealPrepResult<Vec<Job>>;
}
