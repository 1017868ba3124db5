use chrono::{DateTime, Utc};
use mealprep_core::{CircuitBreakerSnapshot, ResilienceConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use super::backing_store::PoolStats;

const ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn worsen(&mut self, to: HealthStatus) {
        let rank = |s: &HealthStatus| match s {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        };
        if rank(&to) > rank(self) {
            *self = to;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub message: String,
    pub severity: IssueSeverity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub count: u64,
    pub errors: u64,
    pub slow: u64,
    pub total_time_ms: f64,
    pub average_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    pub total: u64,
    pub failed: u64,
    pub slow: u64,
    pub average_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIndicators {
    pub connection_success_rate: f64,
    pub query_success_rate: f64,
    pub average_response_ms: f64,
    pub errors_per_minute: u32,
}

impl Default for HealthIndicators {
    fn default() -> Self {
        Self {
            connection_success_rate: 100.0,
            query_success_rate: 100.0,
            average_response_ms: 0.0,
            errors_per_minute: 0,
        }
    }
}

/// Serializable health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub store: String,
    pub connected: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub pool: PoolStats,
    pub connection: ConnectionCounters,
    pub queries: QuerySummary,
    pub operations: BTreeMap<String, OperationStats>,
    pub indicators: HealthIndicators,
    pub circuit_breaker: CircuitBreakerSnapshot,
    /// Threshold breaches found by the last check
    pub issues: Vec<HealthIssue>,
    /// Most recent breaches across checks, oldest first
    pub recent_issues: Vec<HealthIssue>,
}

#[derive(Debug, Clone)]
struct QuerySample {
    at: Instant,
    elapsed_ms: f64,
    failed: bool,
}

/// Accumulated connection and query statistics plus the last classification.
#[derive(Debug)]
pub struct HealthTracker {
    min_pool_size: u32,
    slow_query_threshold: Duration,
    window: usize,
    issue_cap: usize,
    connection: ConnectionCounters,
    total_queries: u64,
    failed_queries: u64,
    slow_queries: u64,
    total_time_ms: f64,
    recent: VecDeque<QuerySample>,
    operations: BTreeMap<String, OperationStats>,
    status: HealthStatus,
    connected: bool,
    pool: PoolStats,
    last_check: Option<DateTime<Utc>>,
    indicators: HealthIndicators,
    issues: Vec<HealthIssue>,
    recent_issues: VecDeque<HealthIssue>,
}

impl HealthTracker {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            min_pool_size: config.min_pool_size,
            slow_query_threshold: config.slow_query_threshold(),
            window: config.recent_query_window,
            issue_cap: config.recent_issue_cap,
            connection: ConnectionCounters::default(),
            total_queries: 0,
            failed_queries: 0,
            slow_queries: 0,
            total_time_ms: 0.0,
            recent: VecDeque::new(),
            operations: BTreeMap::new(),
            status: HealthStatus::Healthy,
            connected: false,
            pool: PoolStats::default(),
            last_check: None,
            indicators: HealthIndicators::default(),
            issues: Vec::new(),
            recent_issues: VecDeque::new(),
        }
    }

    pub fn record_connection(&mut self, success: bool) {
        self.connection.attempts += 1;
        if success {
            self.connection.successes += 1;
        } else {
            self.connection.failures += 1;
        }
    }

    pub fn record_query(&mut self, operation: &str, elapsed: Duration, failed: bool, at: Instant) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let slow = elapsed > self.slow_query_threshold;

        self.total_queries += 1;
        self.total_time_ms += elapsed_ms;
        if failed {
            self.failed_queries += 1;
        }
        if slow {
            self.slow_queries += 1;
        }

        let stats = self.operations.entry(operation.to_string()).or_default();
        stats.count += 1;
        stats.total_time_ms += elapsed_ms;
        stats.average_ms = stats.total_time_ms / stats.count as f64;
        if failed {
            stats.errors += 1;
        }
        if slow {
            stats.slow += 1;
        }

        self.recent.push_back(QuerySample {
            at,
            elapsed_ms,
            failed,
        });
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Reclassify from fresh pool counters and the accumulated statistics
    pub fn evaluate(&mut self, connected: bool, pool: PoolStats, now: Instant, wall: DateTime<Utc>) {
        let indicators = self.indicators(now);
        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();
        let mut issue = |status: &mut HealthStatus, to: HealthStatus, issue_type: &str, message: String| {
            status.worsen(to);
            issues.push(HealthIssue {
                issue_type: issue_type.to_string(),
                message,
                severity: if to == HealthStatus::Unhealthy {
                    IssueSeverity::High
                } else {
                    IssueSeverity::Medium
                },
                timestamp: wall,
            });
        };

        if !connected {
            issue(
                &mut status,
                HealthStatus::Unhealthy,
                "connection",
                "Backing store is disconnected".to_string(),
            );
        } else if pool.available < self.min_pool_size {
            issue(
                &mut status,
                HealthStatus::Unhealthy,
                "pool",
                format!(
                    "Low available connections: {}/{} required",
                    pool.available, self.min_pool_size
                ),
            );
        }
        if pool.pending > 5 {
            issue(
                &mut status,
                HealthStatus::Degraded,
                "pool",
                format!("High pending connections: {}", pool.pending),
            );
        }

        let rate = indicators.connection_success_rate;
        if rate < 90.0 {
            issue(
                &mut status,
                HealthStatus::Unhealthy,
                "connection",
                format!("Low connection success rate: {rate:.2}%"),
            );
        } else if rate < 95.0 {
            issue(
                &mut status,
                HealthStatus::Degraded,
                "connection",
                format!("Degraded connection success rate: {rate:.2}%"),
            );
        }

        let rate = indicators.query_success_rate;
        if rate < 90.0 {
            issue(
                &mut status,
                HealthStatus::Unhealthy,
                "query",
                format!("Low query success rate: {rate:.2}%"),
            );
        } else if rate < 95.0 {
            issue(
                &mut status,
                HealthStatus::Degraded,
                "query",
                format!("Degraded query success rate: {rate:.2}%"),
            );
        }

        let errors = indicators.errors_per_minute;
        if errors > 10 {
            issue(
                &mut status,
                HealthStatus::Unhealthy,
                "error_rate",
                format!("High error rate: {errors} errors per minute"),
            );
        } else if errors > 5 {
            issue(
                &mut status,
                HealthStatus::Degraded,
                "error_rate",
                format!("Elevated error rate: {errors} errors per minute"),
            );
        }

        for found in &issues {
            self.recent_issues.push_back(found.clone());
        }
        while self.recent_issues.len() > self.issue_cap {
            self.recent_issues.pop_front();
        }

        self.status = status;
        self.connected = connected;
        self.pool = pool;
        self.last_check = Some(wall);
        self.indicators = indicators;
        self.issues = issues;
    }

    fn indicators(&self, now: Instant) -> HealthIndicators {
        let connection_success_rate = if self.connection.attempts > 0 {
            self.connection.successes as f64 / self.connection.attempts as f64 * 100.0
        } else {
            100.0
        };

        let window_total = self.recent.len();
        let window_failed = self.recent.iter().filter(|q| q.failed).count();
        let query_success_rate = if window_total > 0 {
            (window_total - window_failed) as f64 / window_total as f64 * 100.0
        } else {
            100.0
        };

        let errors_per_minute = self
            .recent
            .iter()
            .filter(|q| q.failed && now.duration_since(q.at) < ERROR_RATE_WINDOW)
            .count() as u32;

        HealthIndicators {
            connection_success_rate,
            query_success_rate,
            average_response_ms: self.average_ms(),
            errors_per_minute,
        }
    }

    fn average_ms(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.total_time_ms / self.total_queries as f64
        }
    }

    fn query_summary(&self) -> QuerySummary {
        let mut latencies: Vec<f64> = self.recent.iter().map(|q| q.elapsed_ms).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));
        QuerySummary {
            total: self.total_queries,
            failed: self.failed_queries,
            slow: self.slow_queries,
            average_ms: self.average_ms(),
            p50_ms: percentile(&latencies, 50.0),
            p90_ms: percentile(&latencies, 90.0),
            p95_ms: percentile(&latencies, 95.0),
            p99_ms: percentile(&latencies, 99.0),
        }
    }

    pub fn snapshot(&self, store: &str, circuit_breaker: CircuitBreakerSnapshot) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status,
            store: store.to_string(),
            connected: self.connected,
            last_check: self.last_check,
            pool: self.pool,
            connection: self.connection,
            queries: self.query_summary(),
            operations: self.operations.clone(),
            indicators: self.indicators.clone(),
            circuit_breaker,
            issues: self.issues.clone(),
            recent_issues: self.recent_issues.iter().cloned().collect(),
        }
    }
}

/// Nearest-rank percentile over ascending samples
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
