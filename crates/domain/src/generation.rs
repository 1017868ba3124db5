use async_trait::async_trait;
use mealprep_core::MealPrepResult;

use crate::recipe::GeneratedRecipe;

/// External recipe generation service
#[async_trait]
pub trait RecipeGenerator: Send + Sync {
    async fn generate(&self, season: &str, job_id: &str) -> MealPrepResult<Vec<GeneratedRecipe>>;
}

/// Durable store for generated recipes.
/// Raises `MealPrepError::Validation` when a field violates a bound.
#[async_trait]
pub trait RecipeSink: Send + Sync {
    async fn persist(&self, recipe: &GeneratedRecipe) -> MealPrepResult<String>;
}
