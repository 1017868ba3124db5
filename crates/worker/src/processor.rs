use std::sync::Arc;

use async_trait::async_trait;
use mealprep_core::{MealPrepError, MealPrepResult};
use mealprep_domain::{
    GeneratedRecipe, Job, JobLedger, JobPayload, JobType, QueueMessage, RecipeGenerator,
    RecipeSink,
};
use serde_json::json;
use tracing::{info, instrument, warn};

/// What a processor produced for one job
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedJob {
    /// Items persisted
    pub count: usize,
    /// Stored on the job record as `result`
    pub result: serde_json::Value,
}

/// Executes the work behind one job type
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Job type this processor is responsible for
    fn job_type(&self) -> JobType;

    /// Run the job. The job is already `processing` when this is called.
    async fn process(&self, job: &Job, message: &QueueMessage) -> MealPrepResult<ProcessedJob>;
}

/// 食谱生成任务处理器
pub struct RecipeJobProcessor {
    ledger: Arc<JobLedger>,
    generator: Arc<dyn RecipeGenerator>,
    sink: Arc<dyn RecipeSink>,
}

impl RecipeJobProcessor {
    pub fn new(
        ledger: Arc<JobLedger>,
        generator: Arc<dyn RecipeGenerator>,
        sink: Arc<dyn RecipeSink>,
    ) -> Self {
        Self {
            ledger,
            generator,
            sink,
        }
    }

    /// Persist one recipe, retrying once with out-of-range values clamped
    async fn persist(&self, recipe: &GeneratedRecipe) -> MealPrepResult<String> {
        match self.sink.persist(recipe).await {
            Err(MealPrepError::Validation(reason)) => {
                warn!(title = %recipe.title, "食谱数据越界, 自动修正后重试: {reason}");
                self.sink.persist(&recipe.clamped()).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl JobProcessor for RecipeJobProcessor {
    fn job_type(&self) -> JobType {
        JobType::RecipeGeneration
    }

    #[instrument(skip(self, job, message), fields(job_id = %job.id))]
    async fn process(&self, job: &Job, message: &QueueMessage) -> MealPrepResult<ProcessedJob> {
        let season = match (&job.payload, message.season()) {
            (_, Some(season)) => season.to_string(),
            (JobPayload::RecipeGeneration { season }, None) => season.clone(),
            (other, None) => {
                return Err(MealPrepError::TypeMismatch {
                    id: job.id.clone(),
                    expected: JobType::RecipeGeneration.to_string(),
                    actual: other.kind().to_string(),
                })
            }
        };

        let recipes = self.generator.generate(&season, &job.id).await?;
        let total = u32::try_from(recipes.len())
            .map_err(|_| MealPrepError::Generation("生成结果数量过大".to_string()))?;
        self.ledger.update_progress(&job.id, 0, Some(total)).await?;

        let mut recipe_ids = Vec::with_capacity(recipes.len());
        for (index, recipe) in recipes.iter().enumerate() {
            let mut recipe = recipe.clone();
            if recipe.season.is_empty() {
                recipe.season = season.clone();
            }
            recipe_ids.push(self.persist(&recipe).await?);
            self.ledger
                .update_progress(&job.id, index as u32 + 1, None)
                .await?;
        }

        info!(season = %season, count = recipe_ids.len(), "食谱已生成并保存");
        Ok(ProcessedJob {
            count: recipe_ids.len(),
            result: json!({
                "count": recipe_ids.len(),
                "season": season,
                "recipeIds": recipe_ids,
            }),
        })
    }
}
