//! Repo Config Repository
//!
//! Handles all database operations related to repo configs.

use opsdeck_core::domain::repo_config::RepoConfig;
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a config, or update the one already registered for its URL
pub async fn upsert(pool: &PgPool, config: &RepoConfig) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO repo_configs (
            id, name, repo_url, deploy_script, log_path, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (repo_url) DO UPDATE
        SET name = EXCLUDED.name,
            deploy_script = EXCLUDED.deploy_script,
            log_path = EXCLUDED.log_path,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(config.id)
    .bind(&config.name)
    .bind(&config.repo_url)
    .bind(&config.deploy_script)
    .bind(&config.log_path)
    .bind(config.created_at)
    .bind(config.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a config by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<RepoConfig>, sqlx::Error> {
    let row = sqlx::query_as::<_, RepoConfigRow>(
        r#"
        SELECT id, name, repo_url, deploy_script, log_path, created_at, updated_at
        FROM repo_configs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find a config by repository URL
pub async fn find_by_url(pool: &PgPool, repo_url: &str) -> Result<Option<RepoConfig>, sqlx::Error> {
    let row = sqlx::query_as::<_, RepoConfigRow>(
        r#"
        SELECT id, name, repo_url, deploy_script, log_path, created_at, updated_at
        FROM repo_configs
        WHERE repo_url = $1
        "#,
    )
    .bind(repo_url)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all configs
pub async fn list_all(pool: &PgPool) -> Result<Vec<RepoConfig>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RepoConfigRow>(
        r#"
        SELECT id, name, repo_url, deploy_script, log_path, created_at, updated_at
        FROM repo_configs
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete a config by ID
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM repo_configs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RepoConfigRow {
    id: Uuid,
    name: String,
    repo_url: String,
    deploy_script: String,
    log_path: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<RepoConfigRow> for RepoConfig {
    fn from(row: RepoConfigRow) -> Self {
        RepoConfig {
            id: row.id,
            name: row.name,
            repo_url: row.repo_url,
            deploy_script: row.deploy_script,
            log_path: row.log_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
