use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

/// Circuit breaker, retry and health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_seconds: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub health_check_interval_seconds: u64,
    /// Pool is unhealthy when fewer connections than this are available
    pub min_pool_size: u32,
    /// Connections added to the current pool size by a recovery
    pub recovery_pool_growth: u32,
    pub recovery_delay_ms: u64,
    pub slow_query_threshold_ms: u64,
    pub recent_query_window: usize,
    pub recent_issue_cap: usize,
    /// Run recovery automatically when the monitor sees an undersized pool
    pub auto_recover: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_seconds: 60,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            health_check_interval_seconds: 15,
            min_pool_size: 2,
            recovery_pool_growth: 5,
            recovery_delay_ms: 1000,
            slow_query_threshold_ms: 100,
            recent_query_window: 1000,
            recent_issue_cap: 100,
            auto_recover: true,
        }
    }
}

impl ResilienceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.circuit_breaker_threshold == 0 {
            return Err(anyhow::anyhow!("熔断阈值必须大于0"));
        }

        if self.circuit_breaker_reset_seconds == 0 {
            return Err(anyhow::anyhow!("熔断重置时间必须大于0"));
        }

        if self.retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("重试次数必须大于0"));
        }

        if self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }

        if self.recent_query_window == 0 || self.recent_issue_cap == 0 {
            return Err(anyhow::anyhow!("统计窗口大小必须大于0"));
        }

        Ok(())
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            reset_timeout: Duration::from_secs(self.circuit_breaker_reset_seconds),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resilience_config_default() {
        let config = ResilienceConfig::default();

        let breaker = config.circuit_breaker();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.reset_timeout, Duration::from_secs(60));

        let retry = config.retry_policy();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.base_delay, Duration::from_secs(1));

        assert_eq!(config.slow_query_threshold(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = ResilienceConfig {
            circuit_breaker_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
