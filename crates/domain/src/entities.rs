use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mealprep_core::{MealPrepError, MealPrepResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status state machine:
/// `pending -> processing -> {completed | failed}`, `failed -> processing` via retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Edges reachable through a plain update. `failed -> processing` is
    /// deliberately absent; only retry may take it.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = MealPrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(MealPrepError::Validation(format!("未知的任务状态: {s}"))),
        }
    }
}

/// Job type discriminator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    RecipeGeneration,
    GenerateImages,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::RecipeGeneration => "recipe-generation",
            JobType::GenerateImages => "generate-images",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = MealPrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recipe-generation" => Ok(JobType::RecipeGeneration),
            "generate-images" => Ok(JobType::GenerateImages),
            _ => Err(MealPrepError::Validation(format!("未知的任务类型: {s}"))),
        }
    }
}

/// Recipe whose images should be generated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageTarget {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
}

/// Typed job input, one shape per job type. Serialized as
/// `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum JobPayload {
    RecipeGeneration { season: String },
    GenerateImages { recipes: Vec<ImageTarget> },
}

impl JobPayload {
    pub fn recipe_generation(season: impl Into<String>) -> Self {
        JobPayload::RecipeGeneration {
            season: season.into(),
        }
    }

    pub fn kind(&self) -> JobType {
        match self {
            JobPayload::RecipeGeneration { .. } => JobType::RecipeGeneration,
            JobPayload::GenerateImages { .. } => JobType::GenerateImages,
        }
    }

    /// Build from an untyped `(type, data)` pair as producers submit it
    pub fn from_parts(job_type: &str, data: serde_json::Value) -> MealPrepResult<Self> {
        job_type.parse::<JobType>()?;
        let tagged = serde_json::json!({ "type": job_type, "data": data });
        serde_json::from_value(tagged)
            .map_err(|e| MealPrepError::Validation(format!("任务数据无效 ({job_type}): {e}")))
    }

    pub fn validate(&self) -> MealPrepResult<()> {
        match self {
            JobPayload::RecipeGeneration { season } if season.trim().is_empty() => Err(
                MealPrepError::Validation("season不能为空".to_string()),
            ),
            JobPayload::GenerateImages { recipes } if recipes.is_empty() => Err(
                MealPrepError::Validation("recipes不能为空".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(flatten)]
    pub payload: JobPayload,
    pub status: JobStatus,
    pub progress: u32,
    pub total: u32,
    pub error: Option<String>,
    pub attempts: u32,
    pub result: Option<serde_json::Value>,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            status: JobStatus::Pending,
            progress: 0,
            total: 0,
            error: None,
            attempts: 0,
            result: None,
            webhook_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn kind(&self) -> JobType {
        self.payload.kind()
    }

    pub fn is_processing(&self) -> bool {
        self.status == JobStatus::Processing
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The `data` half of the payload, as stored
    pub fn data(&self) -> serde_json::Value {
        match serde_json::to_value(&self.payload) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("data").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        }
    }
}

/// Partial update merged into a job
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u32>,
    pub total: Option<u32>,
    /// `Some(None)` clears the error
    pub error: Option<Option<String>>,
    pub result: Option<serde_json::Value>,
    pub webhook_url: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.total.is_none()
            && self.error.is_none()
            && self.result.is_none()
            && self.webhook_url.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<i64>,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.kind() == t)
    }
}
