//! Pipeline Repository
//!
//! Handles all database operations related to pipeline records.

use opsdeck_core::domain::pipeline::{PipelineRecord, PipelineStatus, TriggerSource};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{StoreError, StoreResult};

/// Create a new pipeline record in the database
pub async fn create(pool: &PgPool, record: &PipelineRecord) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_records (
            id, config_id, repo_name, status, ref, commit_sha, commit_msg, author,
            trigger_source, duration, log, started_at, finished_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(record.id)
    .bind(record.config_id)
    .bind(&record.repo_name)
    .bind(record.status.as_str())
    .bind(&record.git_ref)
    .bind(&record.commit_sha)
    .bind(&record.commit_msg)
    .bind(&record.author)
    .bind(record.trigger_source.as_str())
    .bind(record.duration)
    .bind(&record.log)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(record.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Update the lifecycle columns of a pipeline record
pub async fn update(pool: &PgPool, record: &PipelineRecord) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_records
        SET status = $1, duration = $2, log = $3, started_at = $4, finished_at = $5
        WHERE id = $6
        "#,
    )
    .bind(record.status.as_str())
    .bind(record.duration)
    .bind(&record.log)
    .bind(record.started_at)
    .bind(record.finished_at)
    .bind(record.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Find a pipeline record by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> StoreResult<Option<PipelineRecord>> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, config_id, repo_name, status, ref, commit_sha, commit_msg, author,
               trigger_source, duration, log, started_at, finished_at, created_at
        FROM pipeline_records
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(PipelineRecord::try_from).transpose()
}

/// List the most recent pipeline records
pub async fn list_recent(pool: &PgPool, limit: usize) -> StoreResult<Vec<PipelineRecord>> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, config_id, repo_name, status, ref, commit_sha, commit_msg, author,
               trigger_source, duration, log, started_at, finished_at, created_at
        FROM pipeline_records
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(PipelineRecord::try_from).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    config_id: Uuid,
    repo_name: String,
    status: String,
    #[sqlx(rename = "ref")]
    git_ref: String,
    commit_sha: Option<String>,
    commit_msg: Option<String>,
    author: Option<String>,
    trigger_source: String,
    duration: Option<i64>,
    log: Option<String>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PipelineRow> for PipelineRecord {
    type Error = StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<PipelineStatus>().map_err(StoreError::Corrupt)?;
        let trigger_source = row
            .trigger_source
            .parse::<TriggerSource>()
            .map_err(StoreError::Corrupt)?;

        Ok(PipelineRecord {
            id: row.id,
            config_id: row.config_id,
            repo_name: row.repo_name,
            status,
            git_ref: row.git_ref,
            commit_sha: row.commit_sha,
            commit_msg: row.commit_msg,
            author: row.author,
            trigger_source,
            duration: row.duration,
            log: row.log,
            started_at: row.started_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
        })
    }
}
