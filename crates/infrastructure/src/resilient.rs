//! Resilience wrappers for the job store, recipe store and message queue
//!
//! Store calls are routed through the [`ResilienceSupervisor`] so that each one
//! is timed into the health statistics and protected by its circuit breaker.

use std::sync::Arc;

use async_trait::async_trait;
use mealprep_core::{retry::with_breaker_and_retry, CircuitBreaker, MealPrepResult, RetryPolicy};
use mealprep_domain::{
    GeneratedRecipe, Job, JobFilter, JobRepository, MessageId, QueueMessage, QueueStore,
    RecipeSink,
};

use crate::resilience::ResilienceSupervisor;

/// JobRepository guarded by the resilience supervisor
pub struct ResilientJobRepository {
    inner: Arc<dyn JobRepository>,
    supervisor: Arc<ResilienceSupervisor>,
}

impl ResilientJobRepository {
    pub fn new(inner: Arc<dyn JobRepository>, supervisor: Arc<ResilienceSupervisor>) -> Self {
        Self { inner, supervisor }
    }
}

#[async_trait]
impl JobRepository for ResilientJobRepository {
    async fn insert(&self, job: &Job) -> MealPrepResult<Job> {
        self.supervisor
            .with_retry("jobs.insert", || {
                let inner = self.inner.clone();
                let job = job.clone();
                async move { inner.insert(&job).await }
            })
            .await
    }

    async fn find(&self, id: &str) -> MealPrepResult<Option<Job>> {
        self.supervisor
            .with_retry("jobs.find", || {
                let inner = self.inner.clone();
                let id = id.to_string();
                async move { inner.find(&id).await }
            })
            .await
    }

    async fn save(&self, job: &Job) -> MealPrepResult<Job> {
        self.supervisor
            .with_retry("jobs.save", || {
                let inner = self.inner.clone();
                let job = job.clone();
                async move { inner.save(&job).await }
            })
            .await
    }

    async fn list(&self, filter: &JobFilter) -> MealPrepResult<Vec<Job>> {
        self.supervisor
            .with_retry("jobs.list", || {
                let inner = self.inner.clone();
                let filter = filter.clone();
                async move { inner.list(&filter).await }
            })
            .await
    }
}

/// RecipeSink guarded by the resilience supervisor
pub struct ResilientRecipeSink {
    inner: Arc<dyn RecipeSink>,
    supervisor: Arc<ResilienceSupervisor>,
}

impl ResilientRecipeSink {
    pub fn new(inner: Arc<dyn RecipeSink>, supervisor: Arc<ResilienceSupervisor>) -> Self {
        Self { inner, supervisor }
    }
}

#[async_trait]
impl RecipeSink for ResilientRecipeSink {
    async fn persist(&self, recipe: &GeneratedRecipe) -> MealPrepResult<String> {
        self.supervisor
            .with_retry("recipes.persist", || {
                let inner = self.inner.clone();
                let recipe = recipe.clone();
                async move { inner.persist(&recipe).await }
            })
            .await
    }
}

/// QueueStore with its own circuit breaker and retry-with-backoff
pub struct ResilientQueueStore {
    inner: Arc<dyn QueueStore>,
    circuit_breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilientQueueStore {
    pub fn new(inner: Arc<dyn QueueStore>, circuit_breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self {
            inner,
            circuit_breaker,
            retry,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}

#[async_trait]
impl QueueStore for ResilientQueueStore {
    async fn enqueue(&self, queue: &str, message: &QueueMessage) -> MealPrepResult<MessageId> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            let message = message.clone();
            async move { inner.enqueue(&queue, &message).await }
        })
        .await
    }

    async fn push_raw(&self, queue: &str, raw: String) -> MealPrepResult<()> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            let raw = raw.clone();
            async move { inner.push_raw(&queue, raw).await }
        })
        .await
    }

    async fn dequeue(&self, queue: &str) -> MealPrepResult<Option<String>> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            async move { inner.dequeue(&queue).await }
        })
        .await
    }

    async fn peek(&self, queue: &str) -> MealPrepResult<Option<String>> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            async move { inner.peek(&queue).await }
        })
        .await
    }

    async fn length(&self, queue: &str) -> MealPrepResult<usize> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            async move { inner.length(&queue).await }
        })
        .await
    }

    async fn clear(&self, queue: &str) -> MealPrepResult<()> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            async move { inner.clear(&queue).await }
        })
        .await
    }

    async fn remove_by_id(&self, queue: &str, id: &str) -> MealPrepResult<bool> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            let id = id.to_string();
            async move { inner.remove_by_id(&queue, &id).await }
        })
        .await
    }

    async fn snapshot(&self, queue: &str) -> MealPrepResult<Vec<String>> {
        with_breaker_and_retry(&self.circuit_breaker, &self.retry, || {
            let inner = self.inner.clone();
            let queue = queue.to_string();
            async move { inner.snapshot(&queue).await }
        })
        .await
    }
}
