use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mealprep_core::{MealPrepResult, WorkerConfig};
use mealprep_domain::{JobFilter, JobLedger, JobStatus, QueueMessage, QueueStore};
use metrics::counter;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const ABANDONED_WHILE_PROCESSING: &str = "abandoned while processing";

/// 定期清理长时间停留在 processing 状态的任务
pub struct StaleJobReaper {
    ledger: Arc<JobLedger>,
    queue: Arc<dyn QueueStore>,
    queue_name: String,
    interval: Duration,
    stale_after: Duration,
}

impl StaleJobReaper {
    pub fn new(
        ledger: Arc<JobLedger>,
        queue: Arc<dyn QueueStore>,
        queue_name: impl Into<String>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            ledger,
            queue,
            queue_name: queue_name.into(),
            interval: config.reconcile_interval(),
            stale_after: config.stale_after(),
        }
    }

    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_seconds = self.interval.as_secs(),
                stale_after_seconds = self.stale_after.as_secs(),
                "任务清理已启动"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()).await {
                            error!("清理停滞任务失败: {e}");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("任务清理收到关闭信号");
                        break;
                    }
                }
            }
        })
    }

    /// Fail every `processing` job last touched more than `stale_after`
    /// before `now`, requeueing those with attempts left. Returns how many
    /// jobs were reclaimed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> MealPrepResult<usize> {
        let processing = self
            .ledger
            .list(&JobFilter::with_status(JobStatus::Processing))
            .await?;

        let mut reclaimed = 0;
        for job in processing {
            let stale = (now - job.updated_at)
                .to_std()
                .map(|age| age > self.stale_after)
                .unwrap_or(false);
            if !stale {
                continue;
            }

            let failed = match self.ledger.fail(&job.id, ABANDONED_WHILE_PROCESSING).await {
                Ok(failed) => failed,
                Err(e) => {
                    warn!(job_id = %job.id, "标记停滞任务失败: {e}");
                    continue;
                }
            };
            reclaimed += 1;
            counter!("mealprep_stale_jobs_total").increment(1);

            if failed.attempts >= self.ledger.max_attempts() {
                warn!(job_id = %job.id, attempts = failed.attempts, "停滞任务重试次数已用尽, 不再入队");
                continue;
            }
            let message = QueueMessage::for_job(&failed)?;
            self.queue.enqueue(&self.queue_name, &message).await?;
            info!(job_id = %job.id, attempts = failed.attempts, "停滞任务已重新入队");
        }

        if reclaimed == 0 {
            debug!("没有停滞任务");
        }
        Ok(reclaimed)
    }
}
