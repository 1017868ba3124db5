use std::sync::Arc;
use std::time::Duration;

use mealprep_core::{MealPrepError, WorkerConfig};
use mealprep_domain::{
    Job, JobLedger, JobStatus, JobUpdate, QueueMessage, QueueStore, MAX_ATTEMPTS_EXCEEDED,
};
use metrics::counter;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::processor::JobProcessor;

/// Worker生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Polling,
    Processing,
    ShuttingDown,
}

/// Result of a single polling iteration
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Queue was empty
    Idle,
    Completed { job_id: String, count: usize },
    /// Job failed and its message was requeued
    Failed { job_id: String, error: String },
    /// Message dropped without touching any job
    Discarded { reason: String },
    /// Attempt budget spent; job failed, message not requeued
    Exhausted { job_id: String },
    /// Store unavailable; message (if any) left in or returned to the queue
    Deferred,
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Idle => "idle",
            PollOutcome::Completed { .. } => "completed",
            PollOutcome::Failed { .. } => "failed",
            PollOutcome::Discarded { .. } => "discarded",
            PollOutcome::Exhausted { .. } => "exhausted",
            PollOutcome::Deferred => "deferred",
        }
    }

    /// Whether the loop should wait a poll interval before the next iteration
    fn should_wait(&self) -> bool {
        matches!(self, PollOutcome::Idle | PollOutcome::Deferred)
    }
}

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    worker_id: String,
    ledger: Arc<JobLedger>,
    queue: Arc<dyn QueueStore>,
    processor: Arc<dyn JobProcessor>,
    queue_name: String,
    poll_interval: Duration,
}

impl WorkerServiceBuilder {
    pub fn new(
        worker_id: String,
        ledger: Arc<JobLedger>,
        queue: Arc<dyn QueueStore>,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        Self {
            worker_id,
            ledger,
            queue,
            processor,
            queue_name: "recipe-generation:queue".to_string(),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// 设置队列名称
    pub fn queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// 设置轮询间隔
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Apply the worker section of the application config
    pub fn config(self, config: &WorkerConfig) -> Self {
        self.poll_interval(config.poll_interval())
    }

    pub fn build(self) -> WorkerService {
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        WorkerService {
            worker_id: self.worker_id,
            ledger: self.ledger,
            queue: self.queue,
            processor: self.processor,
            queue_name: self.queue_name,
            poll_interval: self.poll_interval,
            state_tx,
        }
    }
}

/// Single-threaded polling worker for one job type.
///
/// Each iteration pops one message, claims the referenced job, runs the
/// processor and records the outcome before the next pop.
pub struct WorkerService {
    worker_id: String,
    ledger: Arc<JobLedger>,
    queue: Arc<dyn QueueStore>,
    processor: Arc<dyn JobProcessor>,
    queue_name: String,
    poll_interval: Duration,
    state_tx: watch::Sender<WorkerState>,
}

impl WorkerService {
    pub fn builder(
        worker_id: String,
        ledger: Arc<JobLedger>,
        queue: Arc<dyn QueueStore>,
        processor: Arc<dyn JobProcessor>,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(worker_id, ledger, queue, processor)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    pub fn is_processing(&self) -> bool {
        self.state() == WorkerState::Processing
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }

    /// 运行轮询循环, 直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            worker_id = %self.worker_id,
            queue = %self.queue_name,
            job_type = %self.processor.job_type(),
            "Worker已启动"
        );

        loop {
            if shutdown_requested(&mut shutdown_rx) {
                break;
            }

            let outcome = self.poll_once().await;
            if !outcome.should_wait() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        self.set_state(WorkerState::ShuttingDown);
        info!(worker_id = %self.worker_id, "Worker轮询循环已停止");
    }

    /// Wait up to `grace` for an in-flight iteration to finish.
    /// A pending `dequeue` counts as in flight since it may still pop a job.
    /// Returns false when the iteration was abandoned.
    pub async fn drain(&self, grace: Duration) -> bool {
        let mut state_rx = self.subscribe_state();
        let finished = tokio::time::timeout(grace, async {
            while matches!(
                *state_rx.borrow_and_update(),
                WorkerState::Polling | WorkerState::Processing
            ) {
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok();

        if !finished {
            warn!(
                worker_id = %self.worker_id,
                grace_seconds = grace.as_secs(),
                "正在处理的任务未在宽限期内完成, 放弃等待"
            );
        }
        finished
    }

    /// Drain, then join the spawned `run` task, all within `grace`.
    /// The task is aborted when the window runs out.
    pub async fn join_within(&self, mut handle: JoinHandle<()>, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let mut joined = false;
        if self.drain(grace).await {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => joined = true,
                Ok(Err(e)) => {
                    warn!(worker_id = %self.worker_id, "Worker任务异常退出: {e}");
                    joined = true;
                }
                Err(_) => {}
            }
        }

        if !joined {
            warn!(
                worker_id = %self.worker_id,
                grace_seconds = grace.as_secs(),
                "Worker未在宽限期内退出, 强制终止"
            );
            handle.abort();
        }
        joined
    }

    /// Run exactly one polling iteration
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn poll_once(&self) -> PollOutcome {
        self.set_state(WorkerState::Polling);
        let raw = match self.queue.dequeue(&self.queue_name).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.set_state(WorkerState::Idle);
                return PollOutcome::Idle;
            }
            Err(e) => {
                warn!("读取队列失败, 本轮跳过: {e}");
                self.set_state(WorkerState::Idle);
                return self.record(PollOutcome::Deferred);
            }
        };

        self.set_state(WorkerState::Processing);
        let outcome = self.handle(raw).await;
        self.set_state(WorkerState::Idle);
        self.record(outcome)
    }

    fn record(&self, outcome: PollOutcome) -> PollOutcome {
        counter!("mealprep_worker_iterations_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn handle(&self, raw: String) -> PollOutcome {
        let message = match QueueMessage::decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                error!("丢弃无法解析的队列消息: {e}");
                return PollOutcome::Discarded {
                    reason: "malformed message".to_string(),
                };
            }
        };
        let job_id = message.job_id.clone();

        let job = match self.ledger.get(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "任务不存在, 丢弃消息");
                return PollOutcome::Discarded {
                    reason: format!("job {job_id} not found"),
                };
            }
            Err(e) => {
                warn!(job_id = %job_id, "加载任务失败, 消息放回队列: {e}");
                self.requeue(&job_id, raw).await;
                return PollOutcome::Deferred;
            }
        };

        let expected = self.processor.job_type();
        if job.kind() != expected {
            debug!(job_id = %job_id, job_type = %job.kind(), "任务类型不匹配, 丢弃消息");
            return PollOutcome::Discarded {
                reason: MealPrepError::TypeMismatch {
                    id: job_id,
                    expected: expected.to_string(),
                    actual: job.kind().to_string(),
                }
                .to_string(),
            };
        }

        let job = match self.claim(&job).await {
            Ok(job) => job,
            Err(outcome) => {
                if matches!(outcome, PollOutcome::Deferred) {
                    self.requeue(&job_id, raw).await;
                }
                return outcome;
            }
        };

        info!(job_id = %job_id, attempts = job.attempts, "开始处理任务");
        let processed = match self.processor.process(&job, &message).await {
            Ok(processed) => self
                .ledger
                .complete(&job_id, Some(processed.result.clone()))
                .await
                .map(|_| processed),
            Err(e) => Err(e),
        };

        match processed {
            Ok(processed) => PollOutcome::Completed {
                job_id,
                count: processed.count,
            },
            Err(e) => {
                let error = e.to_string();
                error!(job_id = %job_id, "任务处理失败: {error}");
                if let Err(fail_err) = self.ledger.fail(&job_id, &error).await {
                    error!(job_id = %job_id, "记录任务失败状态时出错: {fail_err}");
                }
                self.requeue(&job_id, raw).await;
                PollOutcome::Failed { job_id, error }
            }
        }
    }

    /// Move the job to `processing`, or decide what to do with its message
    async fn claim(&self, job: &Job) -> Result<Job, PollOutcome> {
        match job.status {
            JobStatus::Completed => {
                debug!(job_id = %job.id, "任务已完成, 丢弃重复消息");
                return Err(PollOutcome::Discarded {
                    reason: format!("job {} already completed", job.id),
                });
            }
            // budget check applies to processing jobs too
            _ if job.attempts >= self.ledger.max_attempts() => {
                return Err(self.exhaust(&job.id).await);
            }
            JobStatus::Processing => {
                warn!(job_id = %job.id, "任务正在被处理, 丢弃消息");
                return Err(PollOutcome::Discarded {
                    reason: format!("job {} already processing", job.id),
                });
            }
            _ => {}
        }

        let claimed = if job.status == JobStatus::Failed {
            self.ledger.retry(&job.id).await
        } else {
            self.ledger
                .update(&job.id, JobUpdate::status(JobStatus::Processing))
                .await
        };

        match claimed {
            Ok(job) => Ok(job),
            Err(MealPrepError::MaxAttemptsExceeded { .. }) => Err(self.exhaust(&job.id).await),
            Err(e) if e.is_transient() || matches!(e, MealPrepError::CircuitOpen { .. }) => {
                warn!(job_id = %job.id, "认领任务失败, 消息放回队列: {e}");
                Err(PollOutcome::Deferred)
            }
            Err(e) => {
                warn!(job_id = %job.id, "无法认领任务, 丢弃消息: {e}");
                Err(PollOutcome::Discarded {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn exhaust(&self, job_id: &str) -> PollOutcome {
        warn!(job_id = %job_id, "任务重试次数已用尽");
        if let Err(e) = self.ledger.fail(job_id, MAX_ATTEMPTS_EXCEEDED).await {
            error!(job_id = %job_id, "记录任务失败状态时出错: {e}");
        }
        PollOutcome::Exhausted {
            job_id: job_id.to_string(),
        }
    }

    /// Append the original message bytes to the tail of the queue
    async fn requeue(&self, job_id: &str, raw: String) {
        match self.queue.push_raw(&self.queue_name, raw).await {
            Ok(()) => {
                counter!("mealprep_worker_requeued_total").increment(1);
                debug!(job_id = %job_id, "消息已放回队列");
            }
            Err(e) => error!(job_id = %job_id, "消息放回队列失败, 消息丢失: {e}"),
        }
    }
}

fn shutdown_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        shutdown_rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}
