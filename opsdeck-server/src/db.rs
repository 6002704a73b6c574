use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Repo configs, one per repository URL
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repo_configs (
            id UUID PRIMARY KEY,
            name VARCHAR(100) NOT NULL,
            repo_url VARCHAR(255) NOT NULL UNIQUE,
            deploy_script VARCHAR(255) NOT NULL,
            log_path VARCHAR(255),
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Pipeline records outlive the config they were created from
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_records (
            id UUID PRIMARY KEY,
            config_id UUID NOT NULL,
            repo_name VARCHAR(100) NOT NULL,
            status VARCHAR(20) NOT NULL,
            ref VARCHAR(255) NOT NULL,
            commit_sha VARCHAR(100),
            commit_msg TEXT,
            author VARCHAR(100),
            trigger_source VARCHAR(20) NOT NULL,
            duration BIGINT,
            log TEXT,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_records_created_at ON pipeline_records(created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_records_config_id ON pipeline_records(config_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed");

    Ok(())
}
