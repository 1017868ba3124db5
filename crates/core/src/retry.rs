use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::MealPrepResult;

/// Exponential backoff policy: `base_delay * 2^attempt` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    /// Delay slept after the zero-based `attempt` failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `operation` up to `policy.max_retries` times. Non-transient errors are
/// returned at once; the last transient error is returned when attempts run out.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> MealPrepResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MealPrepResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt + 1 < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "操作失败, 准备重试: {error}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Retry loop run as a single call through the circuit breaker, so a whole
/// exhausted retry sequence counts as one breaker failure.
pub async fn with_breaker_and_retry<F, Fut, T>(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    operation: F,
) -> MealPrepResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MealPrepResult<T>>,
{
    breaker.execute(|| with_retry(policy, operation)).await
}
