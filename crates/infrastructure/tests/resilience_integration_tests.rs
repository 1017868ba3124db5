use std::sync::Arc;

use anyhow::Result;
use mealprep_core::{DatabaseConfig, ResilienceConfig};
use mealprep_domain::{JobLedger, JobPayload, JobStatus, RecipeSink};
use mealprep_infrastructure::resilience::{BackingStore, HealthMonitor, HealthStatus};
use mealprep_infrastructure::{
    DatabaseManager, ResilienceSupervisor, ResilientJobRepository, ResilientRecipeSink,
    SqliteJobRepository, SqliteRecipeSink,
};

struct Harness {
    _dir: tempfile::TempDir,
    db: Arc<DatabaseManager>,
    supervisor: Arc<ResilienceSupervisor>,
    ledger: JobLedger,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(DatabaseManager::new(DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("mealprep.db").display()),
        max_connections: 4,
        min_connections: 1,
        connection_timeout_seconds: 5,
        idle_timeout_seconds: 60,
    }));
    let supervisor = Arc::new(ResilienceSupervisor::new(
        db.clone(),
        ResilienceConfig {
            recovery_delay_ms: 10,
            ..Default::default()
        },
    ));
    let repository = Arc::new(ResilientJobRepository::new(
        Arc::new(SqliteJobRepository::new(db.clone())),
        supervisor.clone(),
    ));
    Harness {
        _dir: dir,
        db,
        supervisor,
        ledger: JobLedger::new(repository, 3),
    }
}

#[tokio::test]
async fn test_repository_connects_lazily_through_supervisor() -> Result<()> {
    let h = harness();
    assert!(!h.db.is_connected().await);

    let job = h.ledger.create(JobPayload::recipe_generation("fall")).await?;
    assert!(h.db.is_connected().await);

    let loaded = h.ledger.get(&job.id).await?.expect("job stored");
    assert_eq!(loaded.status, JobStatus::Pending);

    let snapshot = h.supervisor.check_health().await;
    assert_eq!(snapshot.status, HealthStatus::Healthy);
    assert_eq!(snapshot.connection.attempts, 1);
    assert_eq!(snapshot.operations["jobs.insert"].count, 1);
    assert_eq!(snapshot.operations["jobs.find"].count, 1);
    Ok(())
}

#[tokio::test]
async fn test_dropped_pool_is_reopened_on_next_call() -> Result<()> {
    let h = harness();
    let job = h.ledger.create(JobPayload::recipe_generation("spring")).await?;

    h.db.disconnect().await;
    let processing = h.ledger.update(&job.id, mealprep_domain::JobUpdate::status(JobStatus::Processing)).await?;
    assert_eq!(processing.attempts, 1);

    let snapshot = h.supervisor.snapshot().await;
    assert_eq!(snapshot.connection.attempts, 2);
    assert_eq!(snapshot.connection.failures, 0);
    Ok(())
}

#[tokio::test]
async fn test_monitor_recovers_disconnected_store() -> Result<()> {
    let h = harness();
    h.ledger.create(JobPayload::recipe_generation("summer")).await?;
    h.db.disconnect().await;

    let unhealthy = h.supervisor.check_health().await;
    assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
    assert!(!unhealthy.connected);

    let monitor = HealthMonitor::new(h.supervisor.clone());
    let recovered = monitor.tick().await;
    assert_eq!(recovered.status, HealthStatus::Healthy);
    assert_eq!(recovered.pool.max_size, 9);
    assert!(recovered.recent_issues.iter().any(|i| i.issue_type == "connection"));
    Ok(())
}

#[tokio::test]
async fn test_recipe_sink_rejects_out_of_range_values() -> Result<()> {
    let h = harness();
    let sink = ResilientRecipeSink::new(
        Arc::new(SqliteRecipeSink::new(h.db.clone())),
        h.supervisor.clone(),
    );

    let recipe: mealprep_domain::GeneratedRecipe = serde_json::from_value(serde_json::json!({
        "title": "Harvest Stew",
        "prepTime": 20,
        "cookTime": 400,
        "servings": 6,
        "storageTime": 30
    }))?;
    assert!(sink.persist(&recipe).await.is_err());
    assert!(sink.persist(&recipe.clamped()).await.is_ok());

    // validation failures are not breaker failures
    let snapshot = h.supervisor.snapshot().await;
    assert_eq!(snapshot.circuit_breaker.failures, 0);
    assert_eq!(snapshot.operations["recipes.persist"].errors, 0);
    Ok(())
}
