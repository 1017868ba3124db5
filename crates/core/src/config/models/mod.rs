pub mod app_config;
pub mod database;
pub mod generator;
pub mod observability;
pub mod queue;
pub mod resilience;
pub mod worker;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use generator::GeneratorConfig;
pub use observability::ObservabilityConfig;
pub use queue::{QueueBackend, QueueConfig};
pub use resilience::ResilienceConfig;
pub use worker::WorkerConfig;
