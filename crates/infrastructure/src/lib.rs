pub mod database;
pub mod http_generator;
pub mod in_memory_job_repository;
pub mod in_memory_queue;
pub mod redis_queue;
pub mod resilience;
pub mod resilient;

pub use database::{DatabaseManager, SqliteJobRepository, SqliteRecipeSink};
pub use http_generator::HttpRecipeGenerator;
pub use in_memory_job_repository::InMemoryJobRepository;
pub use in_memory_queue::InMemoryQueueStore;
pub use redis_queue::RedisQueueStore;
pub use resilience::{
    BackingStore, HealthMonitor, HealthSnapshot, HealthStatus, PoolStats, ResilienceSupervisor,
};
pub use resilient::{ResilientJobRepository, ResilientQueueStore, ResilientRecipeSink};
