use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mealprep_core::{MealPrepError, MealPrepResult};
use mealprep_domain::{Job, JobFilter, JobPayload, JobRepository, JobStatus};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::database::DatabaseManager;

const JOB_COLUMNS: &str = "id, job_type, status, progress, total, data, error, attempts, result, webhook_url, created_at, updated_at";

pub struct SqliteJobRepository {
    db: Arc<DatabaseManager>,
}

impl SqliteJobRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> MealPrepResult<Job> {
        let job_type: String = row.try_get("job_type")?;
        let data: String = row.try_get("data")?;
        let status: String = row.try_get("status")?;
        let result: Option<String> = row.try_get("result")?;

        let payload = JobPayload::from_parts(&job_type, serde_json::from_str(&data)?)?;

        Ok(Job {
            id: row.try_get("id")?,
            payload,
            status: status.parse::<JobStatus>()?,
            progress: to_u32(row.try_get("progress")?)?,
            total: to_u32(row.try_get("total")?)?,
            error: row.try_get("error")?,
            attempts: to_u32(row.try_get("attempts")?)?,
            result: result.map(|r| serde_json::from_str(&r)).transpose()?,
            webhook_url: row.try_get("webhook_url")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering equals time ordering
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> MealPrepResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| MealPrepError::Serialization(format!("无效的时间戳 {value}: {e}")))
}

fn to_u32(value: i64) -> MealPrepResult<u32> {
    u32::try_from(value).map_err(|_| MealPrepError::Serialization(format!("数值越界: {value}")))
}

fn optional_json(value: &Option<serde_json::Value>) -> MealPrepResult<Option<String>> {
    Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.kind()))]
    async fn insert(&self, job: &Job) -> MealPrepResult<Job> {
        let mut conn = self.db.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, status, progress, total, data, error, attempts, result, webhook_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.kind().as_str())
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(i64::from(job.total))
        .bind(serde_json::to_string(&job.data())?)
        .bind(&job.error)
        .bind(i64::from(job.attempts))
        .bind(optional_json(&job.result)?)
        .bind(&job.webhook_url)
        .bind(format_timestamp(&job.created_at))
        .bind(format_timestamp(&job.updated_at))
        .execute(&mut *conn)
        .await?;

        debug!("插入任务记录");
        Ok(job.clone())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn find(&self, id: &str) -> MealPrepResult<Option<Job>> {
        let mut conn = self.db.acquire().await?;
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status))]
    async fn save(&self, job: &Job) -> MealPrepResult<Job> {
        let mut conn = self.db.acquire().await?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, progress = ?, total = ?, data = ?, error = ?, attempts = ?,
                result = ?, webhook_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(i64::from(job.total))
        .bind(serde_json::to_string(&job.data())?)
        .bind(&job.error)
        .bind(i64::from(job.attempts))
        .bind(optional_json(&job.result)?)
        .bind(&job.webhook_url)
        .bind(format_timestamp(&job.updated_at))
        .bind(&job.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MealPrepError::not_found(&job.id));
        }
        Ok(job.clone())
    }

    #[instrument(skip(self, filter))]
    async fn list(&self, filter: &JobFilter) -> MealPrepResult<Vec<Job>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1 = 1"));
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(job_type) = filter.job_type {
            query.push(" AND job_type = ").push_bind(job_type.as_str());
        }
        query.push(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit);
        }

        let mut conn = self.db.acquire().await?;
        let rows = query.build().fetch_all(&mut *conn).await?;
        rows.iter().map(Self::row_to_job).collect()
    }
}
