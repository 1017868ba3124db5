use async_trait::async_trait;
use mealprep_core::{MealPrepError, MealPrepResult};
use mealprep_domain::{Job, JobFilter, JobRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Job storage kept in process memory. Insertion order breaks created_at ties.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJobRepository {
    jobs: Arc<RwLock<HashMap<String, (u64, Job)>>>,
    sequence: Arc<std::sync::atomic::AtomicU64>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: &Job) -> MealPrepResult<Job> {
        let seq = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(MealPrepError::Internal(format!("任务ID重复: {}", job.id)));
        }
        jobs.insert(job.id.clone(), (seq, job.clone()));
        Ok(job.clone())
    }

    async fn find(&self, id: &str) -> MealPrepResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).map(|(_, job)| job.clone()))
    }

    async fn save(&self, job: &Job) -> MealPrepResult<Job> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some((_, existing)) => {
                *existing = job.clone();
                Ok(job.clone())
            }
            None => Err(MealPrepError::not_found(&job.id)),
        }
    }

    async fn list(&self, filter: &JobFilter) -> MealPrepResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<&(u64, Job)> =
            jobs.values().filter(|(_, job)| filter.matches(job)).collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });

        let limit = filter
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, job)| job.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealprep_domain::{JobPayload, JobStatus};

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let repo = InMemoryJobRepository::new();
        let mut ids = Vec::new();
        for season in ["spring", "summer", "fall"] {
            let job = repo
                .insert(&Job::new(JobPayload::recipe_generation(season)))
                .await
                .unwrap();
            ids.push(job.id);
        }

        let listed = repo
            .list(&JobFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, ids[2]);
        assert_eq!(listed[1].id, ids[1]);
    }

    #[tokio::test]
    async fn test_save_requires_existing() {
        let repo = InMemoryJobRepository::new();
        let mut job = Job::new(JobPayload::recipe_generation("fall"));
        assert!(repo.save(&job).await.is_err());

        repo.insert(&job).await.unwrap();
        job.status = JobStatus::Failed;
        repo.save(&job).await.unwrap();
        assert_eq!(
            repo.find(&job.id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }
}
