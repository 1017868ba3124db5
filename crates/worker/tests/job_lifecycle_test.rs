use std::sync::Arc;

use async_trait::async_trait;
use mealprep_core::{DatabaseConfig, MealPrepError, MealPrepResult, ResilienceConfig};
use mealprep_domain::{
    GeneratedRecipe, JobLedger, JobPayload, JobStatus, JobUpdate, QueueMessage, QueueStore,
    RecipeGenerator, MAX_ATTEMPTS_EXCEEDED,
};
use mealprep_infrastructure::{
    DatabaseManager, InMemoryJobRepository, InMemoryQueueStore, ResilienceSupervisor,
    ResilientJobRepository, ResilientRecipeSink, SqliteJobRepository, SqliteRecipeSink,
};
use mealprep_worker::{PollOutcome, RecipeJobProcessor, WorkerService};

const QUEUE: &str = "recipe-generation:queue";

struct SeasonalGenerator {
    fail: bool,
}

#[async_trait]
impl RecipeGenerator for SeasonalGenerator {
    async fn generate(&self, season: &str, _job_id: &str) -> MealPrepResult<Vec<GeneratedRecipe>> {
        if self.fail {
            return Err(MealPrepError::Generation("generator timed out".to_string()));
        }
        ["Soup", "Salad", "Bake"]
            .iter()
            .map(|dish| {
                serde_json::from_value(serde_json::json!({
                    "title": format!("{season} {dish}"),
                    "season": season,
                    "prepTime": 20,
                    "cookTime": 45,
                    "servings": 4,
                    "storageTime": 60
                }))
                .map_err(MealPrepError::from)
            })
            .collect()
    }
}

struct Stack {
    _dir: tempfile::TempDir,
    ledger: Arc<JobLedger>,
    queue: InMemoryQueueStore,
    recipes: Arc<SqliteRecipeSink>,
    worker: WorkerService,
}

/// Worker over SQLite, guarded by the resilience supervisor
fn sqlite_stack(fail: bool) -> Stack {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(DatabaseManager::new(DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("jobs.db").display()),
        max_connections: 4,
        min_connections: 1,
        ..Default::default()
    }));
    let supervisor = Arc::new(ResilienceSupervisor::new(db.clone(), ResilienceConfig::default()));

    let ledger = Arc::new(JobLedger::new(
        Arc::new(ResilientJobRepository::new(
            Arc::new(SqliteJobRepository::new(db.clone())),
            supervisor.clone(),
        )),
        3,
    ));
    let recipes = Arc::new(SqliteRecipeSink::new(db));
    let processor = Arc::new(RecipeJobProcessor::new(
        ledger.clone(),
        Arc::new(SeasonalGenerator { fail }),
        Arc::new(ResilientRecipeSink::new(recipes.clone(), supervisor)),
    ));
    let queue = InMemoryQueueStore::new();
    let worker = WorkerService::builder(
        "worker-1".to_string(),
        ledger.clone(),
        Arc::new(queue.clone()),
        processor,
    )
    .queue_name(QUEUE)
    .build();

    Stack {
        _dir: dir,
        ledger,
        queue,
        recipes,
        worker,
    }
}

#[tokio::test]
async fn test_successful_generation_completes_job() {
    let stack = sqlite_stack(false);
    let job = stack
        .ledger
        .create_from_parts("recipe-generation", serde_json::json!({"season": "fall"}))
        .await
        .unwrap();
    stack
        .queue
        .enqueue(QUEUE, &QueueMessage::recipe_generation(job.id.clone(), "fall"))
        .await
        .unwrap();

    let outcome = stack.worker.poll_once().await;
    assert_eq!(
        outcome,
        PollOutcome::Completed {
            job_id: job.id.clone(),
            count: 3
        }
    );

    let stored = stack.ledger.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.result.unwrap()["count"], 3);
    assert_eq!(stack.recipes.count().await.unwrap(), 3);
    assert!(stack.queue.is_empty(QUEUE).await.unwrap());
}

#[tokio::test]
async fn test_generation_error_fails_job_and_requeues_original_message() {
    let stack = sqlite_stack(true);
    let job = stack
        .ledger
        .create(JobPayload::recipe_generation("fall"))
        .await
        .unwrap();
    let original = format!(r#"{{"jobId":"{}","season":"fall"}}"#, job.id);
    stack.queue.push_raw(QUEUE, original.clone()).await.unwrap();

    let outcome = stack.worker.poll_once().await;
    assert!(matches!(outcome, PollOutcome::Failed { ref job_id, .. } if *job_id == job.id));

    let stored = stack.ledger.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains("generator timed out"));
    assert_eq!(stack.queue.snapshot(QUEUE).await.unwrap(), vec![original]);
}

#[tokio::test]
async fn test_exhausted_job_is_failed_without_requeue() {
    let ledger = Arc::new(JobLedger::new(Arc::new(InMemoryJobRepository::new()), 3));
    let queue = InMemoryQueueStore::new();
    let processor = Arc::new(RecipeJobProcessor::new(
        ledger.clone(),
        Arc::new(SeasonalGenerator { fail: false }),
        Arc::new(NullSink),
    ));
    let worker = WorkerService::builder(
        "worker-1".to_string(),
        ledger.clone(),
        Arc::new(queue.clone()),
        processor,
    )
    .queue_name(QUEUE)
    .build();

    let job = ledger
        .create(JobPayload::recipe_generation("winter"))
        .await
        .unwrap();
    ledger
        .update(&job.id, JobUpdate::status(JobStatus::Processing))
        .await
        .unwrap();
    for _ in 0..2 {
        ledger.fail(&job.id, "transient").await.unwrap();
        ledger.retry(&job.id).await.unwrap();
    }
    ledger.fail(&job.id, "transient").await.unwrap();
    assert_eq!(ledger.get(&job.id).await.unwrap().unwrap().attempts, 3);

    queue
        .enqueue(QUEUE, &QueueMessage::recipe_generation(job.id.clone(), "winter"))
        .await
        .unwrap();

    assert_eq!(
        worker.poll_once().await,
        PollOutcome::Exhausted {
            job_id: job.id.clone()
        }
    );
    let stored = ledger.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some(MAX_ATTEMPTS_EXCEEDED));
    assert!(queue.is_empty(QUEUE).await.unwrap());
}

struct NullSink;

#[async_trait]
impl mealprep_domain::RecipeSink for NullSink {
    async fn persist(&self, _recipe: &GeneratedRecipe) -> MealPrepResult<String> {
        Ok("discarded".to_string())
    }
}
