use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use mealprep_core::MealPrepResult;
use mealprep_domain::{GeneratedRecipe, RecipeSink};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::DatabaseManager;

/// Stores generated recipes in the `recipes` table
pub struct SqliteRecipeSink {
    db: Arc<DatabaseManager>,
}

impl SqliteRecipeSink {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn count(&self) -> MealPrepResult<i64> {
        let mut conn = self.db.acquire().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recipes")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecipeSink for SqliteRecipeSink {
    #[instrument(skip(self, recipe), fields(title = %recipe.title))]
    async fn persist(&self, recipe: &GeneratedRecipe) -> MealPrepResult<String> {
        recipe.validate()?;

        let id = Uuid::new_v4().to_string();
        let mut conn = self.db.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO recipes (id, title, season, prep_time, cook_time, servings, storage_time, body, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&recipe.title)
        .bind(&recipe.season)
        .bind(i64::from(recipe.prep_time))
        .bind(i64::from(recipe.cook_time))
        .bind(i64::from(recipe.servings))
        .bind(i64::from(recipe.storage_time))
        .bind(serde_json::to_string(recipe)?)
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&mut *conn)
        .await?;

        debug!(recipe_id = %id, "食谱已保存");
        Ok(id)
    }
}
