use std::sync::Arc;

use anyhow::{Context, Result};
use mealprep_core::{AppConfig, CircuitBreaker, MealPrepError, QueueBackend};
use mealprep_domain::{
    Job, JobFilter, JobLedger, JobPayload, JobStatus, JobType, JobUpdate, QueueMessage,
    QueueStore,
};
use mealprep_infrastructure::{
    DatabaseManager, HealthMonitor, HealthSnapshot, HttpRecipeGenerator, InMemoryQueueStore,
    RedisQueueStore, ResilienceSupervisor, ResilientJobRepository, ResilientQueueStore,
    ResilientRecipeSink, SqliteJobRepository, SqliteRecipeSink,
};
use mealprep_worker::{RecipeJobProcessor, StaleJobReaper, WorkerService};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::shutdown::ShutdownManager;

/// 主应用程序: 配置 -> 存储 -> 弹性包装 -> 任务账本 / 队列 -> Worker
pub struct Application {
    config: AppConfig,
    db: Arc<DatabaseManager>,
    supervisor: Arc<ResilienceSupervisor>,
    ledger: Arc<JobLedger>,
    queue: Arc<dyn QueueStore>,
    redis: Option<Arc<RedisQueueStore>>,
}

impl Application {
    /// Wire every component. Nothing connects until first use.
    pub fn new(config: AppConfig) -> Result<Self> {
        let db = Arc::new(DatabaseManager::new(config.database.clone()));
        let supervisor = Arc::new(ResilienceSupervisor::new(
            db.clone(),
            config.resilience.clone(),
        ));

        let repository = Arc::new(ResilientJobRepository::new(
            Arc::new(SqliteJobRepository::new(db.clone())),
            supervisor.clone(),
        ));
        let ledger = Arc::new(JobLedger::new(repository, config.worker.max_attempts));

        let mut redis = None;
        let raw_queue: Arc<dyn QueueStore> = match config.queue.backend {
            QueueBackend::Redis => {
                let store = Arc::new(
                    RedisQueueStore::new(&config.queue).context("创建Redis队列失败")?,
                );
                redis = Some(store.clone());
                store
            }
            QueueBackend::Memory => {
                warn!("使用进程内队列, 消息不会跨进程共享");
                Arc::new(InMemoryQueueStore::new())
            }
        };
        let queue = Arc::new(ResilientQueueStore::new(
            raw_queue,
            CircuitBreaker::with_config("queue", config.resilience.circuit_breaker()),
            config.resilience.retry_policy(),
        ));

        Ok(Self {
            config,
            db,
            supervisor,
            ledger,
            queue,
            redis,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<dyn QueueStore> {
        &self.queue
    }

    pub fn supervisor(&self) -> &Arc<ResilienceSupervisor> {
        &self.supervisor
    }

    fn queue_name(&self) -> &str {
        &self.config.queue.queue_name
    }

    /// Producer path: create a pending job and enqueue `{jobId, season}`
    pub async fn submit(&self, season: &str, webhook_url: Option<String>) -> Result<Job> {
        let mut job = self
            .ledger
            .create(JobPayload::recipe_generation(season))
            .await?;
        if let Some(url) = webhook_url {
            job = self
                .ledger
                .update(
                    &job.id,
                    JobUpdate {
                        webhook_url: Some(url),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let message = QueueMessage::for_job(&job)?;
        self.queue.enqueue(self.queue_name(), &message).await?;
        info!(job_id = %job.id, season, "任务已提交");
        Ok(job)
    }

    pub async fn status(&self, job_id: &str) -> Result<Job> {
        self.ledger
            .get(job_id)
            .await?
            .ok_or_else(|| MealPrepError::not_found(job_id).into())
    }

    pub async fn list(&self, status: Option<&str>, limit: i64) -> Result<Vec<Job>> {
        let status = status
            .map(|s| s.parse::<JobStatus>())
            .transpose()
            .context("无效的任务状态")?;
        let filter = JobFilter {
            status,
            job_type: None,
            limit: Some(limit),
        };
        Ok(self.ledger.list(&filter).await?)
    }

    /// Put a failed job back on the queue. The worker claims it with
    /// `retry` when the message is popped.
    pub async fn retry(&self, job_id: &str) -> Result<Job> {
        let job = self.status(job_id).await?;
        if job.status != JobStatus::Failed {
            return Err(MealPrepError::InvalidTransition {
                id: job.id,
                from: job.status.to_string(),
                to: JobStatus::Processing.to_string(),
            }
            .into());
        }
        if job.attempts >= self.ledger.max_attempts() {
            return Err(MealPrepError::MaxAttemptsExceeded {
                id: job.id,
                attempts: job.attempts,
            }
            .into());
        }

        if self.queue.remove_by_id(self.queue_name(), &job.id).await? {
            info!(job_id = %job.id, "移除队列中已有的消息");
        }
        let message = QueueMessage::for_job(&job)?;
        self.queue.enqueue(self.queue_name(), &message).await?;
        info!(job_id = %job.id, attempts = job.attempts, "任务已重新入队");
        Ok(job)
    }

    /// Queue length and the first `head` entries
    pub async fn queue_overview(&self, head: usize) -> Result<Value> {
        let entries = self.queue.snapshot(self.queue_name()).await?;
        let preview: Vec<Value> = entries
            .iter()
            .take(head)
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
            .collect();
        Ok(json!({
            "queue": self.queue_name(),
            "length": entries.len(),
            "head": preview,
        }))
    }

    pub async fn health(&self) -> HealthSnapshot {
        if let Err(e) = self.supervisor.ensure_connected().await {
            warn!("连接存储失败: {e}");
        }
        self.supervisor.check_health().await
    }

    pub async fn recover(&self) -> bool {
        self.supervisor.attempt_recovery().await
    }

    /// Run the worker loop, health monitor and reconciliation sweep until
    /// `shutdown` fires, then drain and close the stores.
    pub async fn run(&self, worker_id: String, shutdown: &ShutdownManager) -> Result<()> {
        let job_type: JobType = self
            .config
            .worker
            .job_type
            .parse()
            .context("无效的Worker任务类型")?;
        if job_type != JobType::RecipeGeneration {
            return Err(anyhow::anyhow!("没有处理 {job_type} 任务的处理器"));
        }

        let generator = Arc::new(
            HttpRecipeGenerator::new(self.config.generator.clone())
                .context("创建食谱生成客户端失败")?,
        );
        let sink = Arc::new(ResilientRecipeSink::new(
            Arc::new(SqliteRecipeSink::new(self.db.clone())),
            self.supervisor.clone(),
        ));
        let processor = Arc::new(RecipeJobProcessor::new(
            self.ledger.clone(),
            generator,
            sink,
        ));

        let worker = Arc::new(
            WorkerService::builder(worker_id, self.ledger.clone(), self.queue.clone(), processor)
                .queue_name(self.queue_name())
                .config(&self.config.worker)
                .build(),
        );

        if let Err(e) = self.supervisor.ensure_connected().await {
            warn!("启动时连接数据库失败, 由健康监控继续重试: {e}");
        }

        let monitor_handle = HealthMonitor::new(self.supervisor.clone())
            .spawn(shutdown.subscribe().await);

        let reaper_handle = if self.config.worker.reconcile_enabled {
            let reaper = StaleJobReaper::new(
                self.ledger.clone(),
                self.queue.clone(),
                self.queue_name(),
                &self.config.worker,
            );
            Some(reaper.spawn(shutdown.subscribe().await))
        } else {
            None
        };

        let worker_handle = {
            let worker = worker.clone();
            let shutdown_rx = shutdown.subscribe().await;
            tokio::spawn(async move { worker.run(shutdown_rx).await })
        };

        shutdown.wait_for_shutdown().await;
        info!("开始优雅关闭Worker");

        worker
            .join_within(worker_handle, self.config.worker.shutdown_grace())
            .await;

        if let Err(e) = monitor_handle.await {
            warn!("健康监控任务异常退出: {e}");
        }
        if let Some(handle) = reaper_handle {
            if let Err(e) = handle.await {
                warn!("任务清理异常退出: {e}");
            }
        }

        self.close().await;
        Ok(())
    }

    /// Close the database pool and the cached queue connection
    pub async fn close(&self) {
        self.db.close().await;
        if let Some(redis) = &self.redis {
            redis.close().await;
        }
        info!("存储连接已关闭");
    }
}
