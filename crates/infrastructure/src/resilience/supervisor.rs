use chrono::Utc;
use mealprep_core::{
    retry, CircuitBreaker, MealPrepResult, ResilienceConfig, RetryPolicy,
};
use metrics::{counter, histogram};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backing_store::BackingStore;
use super::health::{HealthSnapshot, HealthStatus, HealthTracker};

/// Circuit breaker, retry policy and health statistics for one backing store.
///
/// Every guarded call lazily connects the store, runs through the breaker and
/// is timed into the health tracker under its operation name.
pub struct ResilienceSupervisor {
    store: Arc<dyn BackingStore>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    config: ResilienceConfig,
    tracker: RwLock<HealthTracker>,
    connect_lock: Mutex<()>,
}

impl ResilienceSupervisor {
    pub fn new(store: Arc<dyn BackingStore>, config: ResilienceConfig) -> Self {
        Self {
            breaker: CircuitBreaker::with_config(store.name().to_string(), config.circuit_breaker()),
            retry: config.retry_policy(),
            tracker: RwLock::new(HealthTracker::new(&config)),
            connect_lock: Mutex::new(()),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Run `operation` once through the circuit breaker
    pub async fn guard<F, Fut, T>(&self, operation_name: &str, operation: F) -> MealPrepResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MealPrepResult<T>>,
    {
        self.breaker
            .execute(|| self.tracked(operation_name, operation()))
            .await
    }

    /// Retry-with-backoff inside the circuit breaker
    pub async fn with_retry<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> MealPrepResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MealPrepResult<T>>,
    {
        self.breaker
            .execute(|| {
                retry::with_retry(&self.retry, move || {
                    self.tracked(operation_name, operation())
                })
            })
            .await
    }

    async fn tracked<Fut, T>(&self, operation_name: &str, operation: Fut) -> MealPrepResult<T>
    where
        Fut: Future<Output = MealPrepResult<T>>,
    {
        self.ensure_connected().await?;

        let start = Instant::now();
        let result = operation.await;
        let elapsed = start.elapsed();

        let failed = matches!(&result, Err(e) if e.is_transient());
        self.tracker
            .write()
            .await
            .record_query(operation_name, elapsed, failed, Instant::now());

        histogram!("mealprep_store_operation_duration_ms", "operation" => operation_name.to_string())
            .record(elapsed.as_secs_f64() * 1000.0);
        if failed {
            counter!("mealprep_store_operation_errors_total", "operation" => operation_name.to_string())
                .increment(1);
        }
        if elapsed > self.config.slow_query_threshold() {
            debug!(operation = operation_name, elapsed_ms = elapsed.as_millis() as u64, "慢查询");
        }
        result
    }

    /// Connect the store if it is not connected yet
    pub async fn ensure_connected(&self) -> MealPrepResult<()> {
        if self.store.is_connected().await {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.store.is_connected().await {
            return Ok(());
        }

        info!(store = self.store.name(), "建立存储连接");
        let result = self.store.connect(None).await;
        self.tracker.write().await.record_connection(result.is_ok());
        if let Err(e) = &result {
            error!(store = self.store.name(), "存储连接失败: {e}");
        }
        result
    }

    /// Rebuild the health classification from fresh pool counters
    pub async fn check_health(&self) -> HealthSnapshot {
        let connected = self.store.is_connected().await;
        let pool = self.store.pool_stats().await;

        let status = {
            let mut tracker = self.tracker.write().await;
            tracker.evaluate(connected, pool, Instant::now(), Utc::now());
            tracker.status()
        };

        let snapshot = self.snapshot().await;
        if status != HealthStatus::Healthy {
            warn!(
                status = ?status,
                issues = ?snapshot.issues,
                "存储健康检查发现问题"
            );
        }
        snapshot
    }

    /// Last computed report, without reclassifying
    pub async fn snapshot(&self) -> HealthSnapshot {
        let breaker = self.breaker.snapshot().await;
        self.tracker.read().await.snapshot(self.store.name(), breaker)
    }

    /// Disconnect, wait, reconnect with a wider pool and verify
    pub async fn attempt_recovery(&self) -> bool {
        let _guard = self.connect_lock.lock().await;
        let before = self.store.pool_stats().await;
        let pool_size = self
            .config
            .min_pool_size
            .max(before.max_size + self.config.recovery_pool_growth);

        warn!(
            store = self.store.name(),
            previous_size = before.max_size,
            pool_size,
            "尝试恢复存储连接"
        );
        counter!("mealprep_store_recoveries_total").increment(1);

        self.store.disconnect().await;
        tokio::time::sleep(self.config.recovery_delay()).await;

        let connected = self.store.connect(Some(pool_size)).await;
        self.tracker.write().await.record_connection(connected.is_ok());
        if let Err(e) = connected {
            error!(store = self.store.name(), "恢复连接失败: {e}");
            return false;
        }

        let recovered = self.store.is_connected().await && self.store.ping().await.is_ok();
        if recovered {
            info!(store = self.store.name(), pool_size, "存储连接已恢复");
        } else {
            error!(store = self.store.name(), "恢复后连接校验失败");
        }
        recovered
    }

    /// Operator action: close the breaker
    pub async fn reset_circuit_breaker(&self) {
        self.breaker.reset().await;
        info!(store = self.store.name(), "熔断器已重置");
    }

    pub async fn disconnect(&self) {
        self.store.disconnect().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::resilience::PoolStats;
    use async_trait::async_trait;
    use mealprep_core::MealPrepError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    /// Store whose availability the test controls
    pub(crate) struct FlakyStore {
        pub connected: AtomicBool,
        pub refuse_connect: AtomicBool,
        pub connects: AtomicU32,
        pub last_size: AtomicU32,
        pub available: AtomicU32,
    }

    impl FlakyStore {
        pub(crate) fn new() -> Self {
            Self {
                connected: AtomicBool::new(false),
                refuse_connect: AtomicBool::new(false),
                connects: AtomicU32::new(0),
                last_size: AtomicU32::new(10),
                available: AtomicU32::new(10),
            }
        }
    }

    #[async_trait]
    impl BackingStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn connect(&self, pool_size: Option<u32>) -> MealPrepResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connect.load(Ordering::SeqCst) {
                return Err(MealPrepError::StoreUnavailable("refused".to_string()));
            }
            if let Some(size) = pool_size {
                self.last_size.store(size, Ordering::SeqCst);
                self.available.store(size, Ordering::SeqCst);
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn ping(&self) -> MealPrepResult<()> {
            if self.connected.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(MealPrepError::StoreUnavailable("down".to_string()))
            }
        }

        async fn pool_stats(&self) -> PoolStats {
            if !self.connected.load(Ordering::SeqCst) {
                return PoolStats::default();
            }
            PoolStats {
                size: 2,
                max_size: self.last_size.load(Ordering::SeqCst),
                available: self.available.load(Ordering::SeqCst),
                pending: 0,
            }
        }
    }

    fn supervisor() -> (ResilienceSupervisor, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::new());
        (
            ResilienceSupervisor::new(store.clone(), ResilienceConfig::default()),
            store,
        )
    }

    fn unavailable<T>() -> MealPrepResult<T> {
        Err(MealPrepError::StoreUnavailable("timeout".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_connects_lazily() {
        let (supervisor, store) = supervisor();
        let value = supervisor.guard("jobs.find", || async { Ok(5) }).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(store.connects.load(Ordering::SeqCst), 1);

        supervisor.guard("jobs.find", || async { Ok(()) }).await.unwrap();
        assert_eq!(store.connects.load(Ordering::SeqCst), 1);

        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.connection.successes, 1);
        assert_eq!(snapshot.operations["jobs.find"].count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_five_failures() {
        let (supervisor, _) = supervisor();
        for _ in 0..5 {
            let _ = supervisor.guard("jobs.save", || async { unavailable::<()>() }).await;
        }

        let invoked = AtomicU32::new(0);
        let result = supervisor
            .guard("jobs.save", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(MealPrepError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        let result = supervisor
            .guard("jobs.save", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_backs_off_and_records_each_attempt() {
        let (supervisor, _) = supervisor();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = supervisor
            .with_retry("jobs.find", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    unavailable()
                } else {
                    Ok("found")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "found");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));

        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.operations["jobs.find"].count, 3);
        assert_eq!(snapshot.operations["jobs.find"].errors, 2);
        assert_eq!(snapshot.circuit_breaker.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_refused_counts_as_failure() {
        let (supervisor, store) = supervisor();
        store.refuse_connect.store(true, Ordering::SeqCst);

        let result = supervisor.guard("jobs.find", || async { Ok(()) }).await;
        assert!(matches!(result, Err(MealPrepError::StoreUnavailable(_))));

        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.connection.failures, 1);
        assert_eq!(snapshot.circuit_breaker.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_follows_pool_availability() {
        let (supervisor, store) = supervisor();
        supervisor.ensure_connected().await.unwrap();

        store.available.store(1, Ordering::SeqCst);
        assert_eq!(supervisor.check_health().await.status, HealthStatus::Unhealthy);

        store.available.store(6, Ordering::SeqCst);
        assert_eq!(supervisor.check_health().await.status, HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_recovery_widens_pool() {
        let (supervisor, store) = supervisor();
        supervisor.ensure_connected().await.unwrap();

        let start = Instant::now();
        assert!(supervisor.attempt_recovery().await);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(store.last_size.load(Ordering::SeqCst), 15);
        assert!(store.connected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_recovery_reports_failure() {
        let (supervisor, store) = supervisor();
        supervisor.ensure_connected().await.unwrap();
        store.refuse_connect.store(true, Ordering::SeqCst);

        assert!(!supervisor.attempt_recovery().await);
        assert!(!store.connected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_circuit_breaker() {
        let (supervisor, _) = supervisor();
        for _ in 0..5 {
            let _ = supervisor.guard("jobs.save", || async { unavailable::<()>() }).await;
        }
        assert!(supervisor.circuit_breaker().is_open().await);

        supervisor.reset_circuit_breaker().await;
        assert!(supervisor.guard("jobs.save", || async { Ok(()) }).await.is_ok());
    }
}
