pub mod backing_store;
pub mod health;
pub mod monitor;
pub mod supervisor;

pub use backing_store::{BackingStore, PoolStats};
pub use health::{
    percentile, ConnectionCounters, HealthIndicators, HealthIssue, HealthSnapshot, HealthStatus,
    HealthTracker, IssueSeverity, OperationStats, QuerySummary,
};
pub use monitor::{needs_recovery, HealthMonitor};
pub use supervisor::ResilienceSupervisor;
