//! 配置管理
//!
//! 加载顺序: 内置默认值 -> TOML配置文件 -> 环境变量 (前缀 `MEALPREP`, 分隔符 `__`)。
//!
//! ```toml
//! [worker]
//! poll_interval_seconds = 5
//! max_attempts = 3
//!
//! [resilience]
//! circuit_breaker_threshold = 5
//! circuit_breaker_reset_seconds = 60
//! ```

pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, GeneratorConfig, ObservabilityConfig, QueueBackend, QueueConfig,
    ResilienceConfig, WorkerConfig,
};
