use async_trait::async_trait;
use mealprep_core::{GeneratorConfig, MealPrepError, MealPrepResult};
use mealprep_domain::{GeneratedRecipe, RecipeGenerator};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    season: &'a str,
    job_id: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerateResponse {
    List(Vec<GeneratedRecipe>),
    Wrapped { recipes: Vec<GeneratedRecipe> },
}

/// Calls the recipe generation service over HTTP
pub struct HttpRecipeGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpRecipeGenerator {
    pub fn new(config: GeneratorConfig) -> MealPrepResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| MealPrepError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl RecipeGenerator for HttpRecipeGenerator {
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint))]
    async fn generate(&self, season: &str, job_id: &str) -> MealPrepResult<Vec<GeneratedRecipe>> {
        let start = Instant::now();
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&GenerateRequest { season, job_id });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            counter!("mealprep_generator_errors_total").increment(1);
            MealPrepError::Generation(format!("请求生成服务失败: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "生成服务返回错误");
            counter!("mealprep_generator_errors_total").increment(1);
            return Err(MealPrepError::Generation(format!(
                "生成服务返回 {status}: {body}"
            )));
        }

        let recipes = match response.json::<GenerateResponse>().await {
            Ok(GenerateResponse::List(recipes)) | Ok(GenerateResponse::Wrapped { recipes }) => {
                recipes
            }
            Err(e) => {
                return Err(MealPrepError::Generation(format!("无法解析生成结果: {e}")));
            }
        };

        histogram!("mealprep_generator_duration_ms").record(start.elapsed().as_millis() as f64);
        info!(count = recipes.len(), "生成服务返回食谱");
        Ok(recipes)
    }
}
