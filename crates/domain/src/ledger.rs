//! # 任务台账服务
//!
//! 在任意 [`JobRepository`] 之上实现任务状态机:
//!
//! ```text
//! pending -> processing -> completed
//!    |           |
//!    +-----------+-> failed -> (retry) -> processing
//! ```
//!
//! 进入 `processing` 总是使 `attempts` 加一, 且 `attempts` 永远不会超过
//! 配置的最大尝试次数。

use std::sync::Arc;

use mealprep_core::{MealPrepError, MealPrepResult};
use tracing::{debug, info, instrument, warn};

use crate::entities::{Job, JobFilter, JobPayload, JobStatus, JobUpdate};
use crate::repositories::JobRepository;

pub const MAX_ATTEMPTS_EXCEEDED: &str = "max attempts exceeded";

pub struct JobLedger {
    repository: Arc<dyn JobRepository>,
    max_attempts: u32,
}

impl JobLedger {
    pub fn new(repository: Arc<dyn JobRepository>, max_attempts: u32) -> Self {
        Self {
            repository,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[instrument(skip(self, payload), fields(job_type = %payload.kind()))]
    pub async fn create(&self, payload: JobPayload) -> MealPrepResult<Job> {
        payload.validate()?;
        let job = self.repository.insert(&Job::new(payload)).await?;
        info!(job_id = %job.id, "任务已创建");
        Ok(job)
    }

    /// Create from an untyped `(type, data)` pair
    pub async fn create_from_parts(
        &self,
        job_type: &str,
        data: serde_json::Value,
    ) -> MealPrepResult<Job> {
        self.create(JobPayload::from_parts(job_type, data)?).await
    }

    pub async fn get(&self, id: &str) -> MealPrepResult<Option<Job>> {
        self.repository.find(id).await
    }

    pub async fn list(&self, filter: &JobFilter) -> MealPrepResult<Vec<Job>> {
        self.repository.list(filter).await
    }

    #[instrument(skip(self, update), fields(job_id = %id))]
    pub async fn update(&self, id: &str, update: JobUpdate) -> MealPrepResult<Job> {
        let mut job = self.load(id).await?;
        self.apply(&mut job, update)?;
        self.repository.save(&job).await
    }

    pub async fn update_progress(
        &self,
        id: &str,
        progress: u32,
        total: Option<u32>,
    ) -> MealPrepResult<Job> {
        let mut job = self.load(id).await?;
        let effective_total = total.unwrap_or(job.total);
        if effective_total > 0 && progress > effective_total {
            return Err(MealPrepError::Validation(format!(
                "进度 {progress} 超过总数 {effective_total}"
            )));
        }
        self.apply(
            &mut job,
            JobUpdate {
                progress: Some(progress),
                total,
                ..Default::default()
            },
        )?;
        self.repository.save(&job).await
    }

    #[instrument(skip(self, result), fields(job_id = %id))]
    pub async fn complete(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> MealPrepResult<Job> {
        let mut job = self.load(id).await?;
        self.apply(
            &mut job,
            JobUpdate {
                status: Some(JobStatus::Completed),
                result,
                ..Default::default()
            },
        )?;
        let job = self.repository.save(&job).await?;
        info!(attempts = job.attempts, "任务完成");
        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn fail(&self, id: &str, error: &str) -> MealPrepResult<Job> {
        let mut job = self.load(id).await?;
        self.apply(
            &mut job,
            JobUpdate {
                status: Some(JobStatus::Failed),
                error: Some(Some(error.to_string())),
                ..Default::default()
            },
        )?;
        let job = self.repository.save(&job).await?;
        warn!(attempts = job.attempts, "任务失败: {error}");
        Ok(job)
    }

    /// `failed -> processing`, the only backward edge
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn retry(&self, id: &str) -> MealPrepResult<Job> {
        let mut job = self.load(id).await?;
        if job.status != JobStatus::Failed {
            return Err(invalid_transition(&job, JobStatus::Processing));
        }
        self.claim_attempt(&job)?;

        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.error = None;
        job.touch();

        let job = self.repository.save(&job).await?;
        info!(attempts = job.attempts, "任务重试");
        Ok(job)
    }

    async fn load(&self, id: &str) -> MealPrepResult<Job> {
        self.repository
            .find(id)
            .await?
            .ok_or_else(|| MealPrepError::not_found(id))
    }

    fn claim_attempt(&self, job: &Job) -> MealPrepResult<()> {
        if job.attempts >= self.max_attempts {
            return Err(MealPrepError::MaxAttemptsExceeded {
                id: job.id.clone(),
                attempts: job.attempts,
            });
        }
        Ok(())
    }

    /// Validate and merge; leaves `job` untouched on error
    fn apply(&self, job: &mut Job, update: JobUpdate) -> MealPrepResult<()> {
        if let Some(next) = update.status {
            if !job.status.can_transition_to(next) {
                return Err(invalid_transition(job, next));
            }
            if next == JobStatus::Processing {
                self.claim_attempt(job)?;
            }
        }

        if let Some(next) = update.status {
            debug!(from = %job.status, to = %next, "任务状态变更");
            if next == JobStatus::Processing {
                job.attempts += 1;
            }
            job.status = next;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
        }
        if let Some(total) = update.total {
            job.total = total;
        }
        if let Some(error) = update.error {
            job.error = error;
        }
        if let Some(result) = update.result {
            job.result = Some(result);
        }
        if let Some(url) = update.webhook_url {
            job.webhook_url = Some(url);
        }
        job.touch();
        Ok(())
    }
}

fn invalid_transition(job: &Job, to: JobStatus) -> MealPrepError {
    MealPrepError::InvalidTransition {
        id: job.id.clone(),
        from: job.status.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MockJobRepository {
        jobs: Mutex<HashMap<String, Job>>,
        saves: Mutex<u32>,
    }

    #[async_trait]
    impl JobRepository for MockJobRepository {
        async fn insert(&self, job: &Job) -> MealPrepResult<Job> {
            self.jobs.lock().await.insert(job.id.clone(), job.clone());
            Ok(job.clone())
        }

        async fn find(&self, id: &str) -> MealPrepResult<Option<Job>> {
            Ok(self.jobs.lock().await.get(id).cloned())
        }

        async fn save(&self, job: &Job) -> MealPrepResult<Job> {
            *self.saves.lock().await += 1;
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(&job.id) {
                Some(existing) => {
                    *existing = job.clone();
                    Ok(job.clone())
                }
                None => Err(MealPrepError::not_found(&job.id)),
            }
        }

        async fn list(&self, filter: &JobFilter) -> MealPrepResult<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .jobs
                .lock()
                .await
                .values()
                .filter(|j| filter.matches(j))
                .cloned()
                .collect();
            jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(jobs)
        }
    }

    fn ledger() -> (JobLedger, Arc<MockJobRepository>) {
        let repo = Arc::new(MockJobRepository::default());
        (JobLedger::new(repo.clone(), 3), repo)
    }

    async fn processing_job(ledger: &JobLedger) -> Job {
        let job = ledger
            .create(JobPayload::recipe_generation("fall"))
            .await
            .unwrap();
        ledger
            .update(&job.id, JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_sets_pending() {
        let (ledger, _) = ledger();
        let job = ledger
            .create_from_parts("recipe-generation", serde_json::json!({"season": "fall"}))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.progress, 0);
        assert!(ledger.get(&job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_payload() {
        let (ledger, repo) = ledger();
        let result = ledger.create(JobPayload::recipe_generation("")).await;
        assert!(matches!(result, Err(MealPrepError::Validation(_))));
        assert!(repo.jobs.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_processing_increments_attempts() {
        let (ledger, _) = ledger();
        let job = processing_job(&ledger).await;
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.updated_at >= job.created_at);
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let (ledger, _) = ledger();
        let result = ledger.update("missing", JobUpdate::default()).await;
        assert!(matches!(result, Err(MealPrepError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_cannot_reopen_failed_job() {
        let (ledger, _) = ledger();
        let job = processing_job(&ledger).await;
        ledger.fail(&job.id, "boom").await.unwrap();

        let result = ledger
            .update(&job.id, JobUpdate::status(JobStatus::Processing))
            .await;
        assert!(matches!(result, Err(MealPrepError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_complete_stores_result() {
        let (ledger, _) = ledger();
        let job = processing_job(&ledger).await;
        let done = ledger
            .complete(&job.id, Some(serde_json::json!({"count": 3})))
            .await
            .unwrap();

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(serde_json::json!({"count": 3})));

        let again = ledger.fail(&job.id, "late").await;
        assert!(matches!(again, Err(MealPrepError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let (ledger, _) = ledger();
        let job = ledger
            .create(JobPayload::recipe_generation("fall"))
            .await
            .unwrap();
        let result = ledger.complete(&job.id, None).await;
        assert!(matches!(result, Err(MealPrepError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_retry_only_from_failed() {
        let (ledger, repo) = ledger();
        let job = processing_job(&ledger).await;
        let saves_before = *repo.saves.lock().await;

        let result = ledger.retry(&job.id).await;
        assert!(matches!(result, Err(MealPrepError::InvalidTransition { .. })));
        assert_eq!(*repo.saves.lock().await, saves_before);
        assert_eq!(ledger.get(&job.id).await.unwrap().unwrap(), job);

        ledger.fail(&job.id, "generator timeout").await.unwrap();
        let retried = ledger.retry(&job.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Processing);
        assert_eq!(retried.attempts, 2);
        assert!(retried.error.is_none());
    }

    #[tokio::test]
    async fn test_attempts_never_exceed_max() {
        let (ledger, _) = ledger();
        let job = processing_job(&ledger).await;
        for _ in 0..2 {
            ledger.fail(&job.id, "boom").await.unwrap();
            ledger.retry(&job.id).await.unwrap();
        }
        let failed = ledger.fail(&job.id, "boom").await.unwrap();
        assert_eq!(failed.attempts, 3);

        let result = ledger.retry(&job.id).await;
        assert!(matches!(
            result,
            Err(MealPrepError::MaxAttemptsExceeded { attempts: 3, .. })
        ));
        let stored = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 3);
    }

    #[tokio::test]
    async fn test_update_progress_bounds() {
        let (ledger, _) = ledger();
        let job = processing_job(&ledger).await;

        let job = ledger.update_progress(&job.id, 0, Some(3)).await.unwrap();
        assert_eq!(job.total, 3);

        let job = ledger.update_progress(&job.id, 2, None).await.unwrap();
        assert_eq!(job.progress, 2);

        let result = ledger.update_progress(&job.id, 4, None).await;
        assert!(matches!(result, Err(MealPrepError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let (ledger, _) = ledger();
        let first = ledger
            .create(JobPayload::recipe_generation("fall"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = ledger
            .create(JobPayload::recipe_generation("winter"))
            .await
            .unwrap();

        let jobs = ledger.list(&JobFilter::default()).await.unwrap();
        assert_eq!(jobs[0].id, second.id);
        assert_eq!(jobs[1].id, first.id);
    }
}
