use metrics::gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::health::{HealthSnapshot, HealthStatus};
use super::supervisor::ResilienceSupervisor;

/// 周期性健康检查, 必要时触发自动恢复
pub struct HealthMonitor {
    supervisor: Arc<ResilienceSupervisor>,
    interval: Duration,
    auto_recover: bool,
}

impl HealthMonitor {
    pub fn new(supervisor: Arc<ResilienceSupervisor>) -> Self {
        let config = supervisor.config();
        Self {
            interval: config.health_check_interval(),
            auto_recover: config.auto_recover,
            supervisor,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 启动监控循环, 收到关闭信号后退出
    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                store = self.supervisor.store().name(),
                interval_seconds = self.interval.as_secs(),
                "健康监控已启动"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("健康监控收到关闭信号");
                        break;
                    }
                }
            }
        })
    }

    /// One check cycle; returns the report it produced
    pub async fn tick(&self) -> HealthSnapshot {
        let snapshot = self.supervisor.check_health().await;
        record_gauges(&snapshot);

        if self.auto_recover && needs_recovery(&snapshot, self.supervisor.config().min_pool_size) {
            warn!(
                store = %snapshot.store,
                connected = snapshot.connected,
                available = snapshot.pool.available,
                "连接池不可用, 开始自动恢复"
            );
            if self.supervisor.attempt_recovery().await {
                return self.supervisor.check_health().await;
            }
        } else {
            debug!(status = ?snapshot.status, "健康检查完成");
        }
        snapshot
    }
}

/// Recovery is attempted only for connectivity problems, not for slow or failing queries
pub fn needs_recovery(snapshot: &HealthSnapshot, min_pool_size: u32) -> bool {
    !snapshot.connected || snapshot.pool.available < min_pool_size
}

fn record_gauges(snapshot: &HealthSnapshot) {
    let status = match snapshot.status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 2.0,
    };
    gauge!("mealprep_store_health_status").set(status);
    gauge!("mealprep_store_pool_available").set(snapshot.pool.available as f64);
    gauge!("mealprep_store_pool_pending").set(snapshot.pool.pending as f64);
    gauge!("mealprep_store_errors_per_minute").set(snapshot.indicators.errors_per_minute as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::supervisor::tests::FlakyStore;
    use mealprep_core::ResilienceConfig;
    use std::sync::atomic::Ordering;

    fn monitor(auto_recover: bool) -> (HealthMonitor, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::new());
        let config = ResilienceConfig {
            auto_recover,
            ..Default::default()
        };
        let supervisor = Arc::new(ResilienceSupervisor::new(store.clone(), config));
        (HealthMonitor::new(supervisor), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_recovers_disconnected_store() {
        let (monitor, store) = monitor(true);
        let snapshot = monitor.tick().await;

        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert!(snapshot.connected);
        assert!(store.connected.load(Ordering::SeqCst));
        assert_eq!(snapshot.recent_issues.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_without_auto_recover_reports_only() {
        let (monitor, store) = monitor(false);
        let snapshot = monitor.tick().await;

        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert_eq!(store.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_stops_on_shutdown() {
        let (monitor, _) = monitor(false);
        let (tx, rx) = broadcast::channel(1);
        let handle = monitor.with_interval(Duration::from_secs(5)).spawn(rx);

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
