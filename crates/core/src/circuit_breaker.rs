use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{MealPrepError, MealPrepResult};

/// Circuit breaker state, derived from the failure counter and the age of
/// the last failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Fewer failures than the threshold
    Closed,
    /// Threshold reached and the reset timeout has not elapsed
    Open,
    /// Threshold reached but the reset timeout elapsed; the next call is a trial
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before calls are rejected
    pub failure_threshold: u32,
    /// How long after the last failure calls stay rejected
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Consecutive failures since the last success
    pub failures: u32,
    /// When the most recent failure was recorded
    pub last_failure: Option<Instant>,
    /// Total guarded calls that reached the operation
    pub total_calls: u64,
    /// Calls rejected without invoking the operation
    pub rejected_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    trial_in_flight: bool,
}

impl CircuitBreakerStats {
    fn new() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            total_calls: 0,
            rejected_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            trial_in_flight: false,
        }
    }

    fn state(&self, config: &CircuitBreakerConfig, now: Instant) -> CircuitState {
        if self.failures < config.failure_threshold {
            return CircuitState::Closed;
        }
        match self.last_failure {
            Some(at) if now.duration_since(at) < config.reset_timeout => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

/// Serializable view of the breaker for health reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub component: String,
    pub state: CircuitState,
    pub failures: u32,
    pub threshold: u32,
    pub reset_timeout_seconds: u64,
    /// Seconds since the last failure, if any
    pub last_failure_age_seconds: Option<u64>,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker guarding calls to one backing component.
///
/// Only transient errors (see [`MealPrepError::is_transient`]) count as
/// failures; domain errors pass through and leave the counter untouched.
pub struct CircuitBreaker {
    component: String,
    config: CircuitBreakerConfig,
    stats: Arc<RwLock<CircuitBreakerStats>>,
}

impl CircuitBreaker {
    pub fn new(component: impl Into<String>) -> Self {
        Self::with_config(component, CircuitBreakerConfig::default())
    }

    pub fn with_config(component: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            component: component.into(),
            config,
            stats: Arc::new(RwLock::new(CircuitBreakerStats::new())),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute operation with circuit breaker protection
    pub async fn execute<F, Fut, T>(&self, operation: F) -> MealPrepResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = MealPrepResult<T>>,
    {
        let admission = self.admit().await?;

        let result = operation().await;

        let mut stats = self.stats.write().await;
        if matches!(admission, Admission::Trial) {
            stats.trial_in_flight = false;
        }
        stats.total_calls += 1;
        match &result {
            Ok(_) => {
                if stats.failures > 0 {
                    debug!(component = %self.component, "熔断器计数已重置");
                }
                stats.successful_calls += 1;
                stats.failures = 0;
                stats.last_failure = None;
            }
            Err(error) if error.is_transient() => {
                stats.failed_calls += 1;
                stats.failures += 1;
                stats.last_failure = Some(Instant::now());
                if stats.failures == self.config.failure_threshold {
                    warn!(
                        component = %self.component,
                        failures = stats.failures,
                        "熔断器打开: {error}"
                    );
                }
            }
            Err(_) => {}
        }

        result
    }

    async fn admit(&self) -> MealPrepResult<Admission> {
        let mut stats = self.stats.write().await;
        match stats.state(&self.config, Instant::now()) {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen if !stats.trial_in_flight => {
                debug!(component = %self.component, "熔断器半开, 放行试探调用");
                stats.trial_in_flight = true;
                Ok(Admission::Trial)
            }
            _ => {
                stats.rejected_calls += 1;
                Err(MealPrepError::CircuitOpen {
                    component: self.component.clone(),
                })
            }
        }
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        self.stats.read().await.state(&self.config, Instant::now())
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitState::Open
    }

    /// Get circuit breaker statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        self.stats.read().await.clone()
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let stats = self.stats.read().await;
        let now = Instant::now();
        CircuitBreakerSnapshot {
            component: self.component.clone(),
            state: stats.state(&self.config, now),
            failures: stats.failures,
            threshold: self.config.failure_threshold,
            reset_timeout_seconds: self.config.reset_timeout.as_secs(),
            last_failure_age_seconds: stats
                .last_failure
                .map(|at| now.duration_since(at).as_secs()),
            total_calls: stats.total_calls,
            rejected_calls: stats.rejected_calls,
        }
    }

    /// Reset circuit breaker to closed state
    pub async fn reset(&self) {
        let mut stats = self.stats.write().await;
        *stats = CircuitBreakerStats::new();
    }
}
