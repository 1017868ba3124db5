use mealprep_core::{MealPrepError, MealPrepResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::{Job, JobPayload};

/// Message id returned by `enqueue`; equal to the referenced job id
pub type MessageId = String;

/// Queue envelope: `{"jobId": "...", ...payload fields}`.
///
/// The recipe generation queue carries `{"jobId", "season"}`; other job types
/// add their own fields next to `jobId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl QueueMessage {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn recipe_generation(job_id: impl Into<String>, season: impl Into<String>) -> Self {
        let season: String = season.into();
        Self::new(job_id).with_field("season", season)
    }

    /// Rebuild the producer's message from a stored job
    pub fn for_job(job: &Job) -> MealPrepResult<Self> {
        match &job.payload {
            JobPayload::RecipeGeneration { season } => {
                Ok(Self::recipe_generation(job.id.clone(), season.clone()))
            }
            JobPayload::GenerateImages { recipes } => Ok(Self::new(job.id.clone())
                .with_field("recipes", serde_json::to_value(recipes)?)),
        }
    }

    pub fn season(&self) -> Option<&str> {
        self.payload.get("season").and_then(Value::as_str)
    }

    pub fn encode(&self) -> MealPrepResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a raw queue entry. Entries without a string `jobId` are malformed.
    pub fn decode(raw: &str) -> MealPrepResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| MealPrepError::Serialization(format!("无法解析队列消息: {e}")))
    }

    /// Cheap id extraction used by scans that must not fail on bad entries
    pub fn peek_job_id(raw: &str) -> Option<String> {
        serde_json::from_str::<Value>(raw)
            .ok()?
            .get("jobId")?
            .as_str()
            .map(str::to_string)
    }
}
