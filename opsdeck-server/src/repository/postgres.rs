//! Postgres-backed `DeployRepository`

use async_trait::async_trait;
use opsdeck_core::domain::pipeline::PipelineRecord;
use opsdeck_core::domain::repo_config::RepoConfig;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{
    DeployRepository, StoreResult, pipeline_repository, repo_config_repository,
};

/// Delegates to the query functions of `repo_config` and `pipeline`
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeployRepository for PgRepository {
    async fn save_config(&self, config: &RepoConfig) -> StoreResult<()> {
        Ok(repo_config_repository::upsert(&self.pool, config).await?)
    }

    async fn find_config(&self, id: Uuid) -> StoreResult<Option<RepoConfig>> {
        Ok(repo_config_repository::find_by_id(&self.pool, id).await?)
    }

    async fn find_config_by_url(&self, repo_url: &str) -> StoreResult<Option<RepoConfig>> {
        Ok(repo_config_repository::find_by_url(&self.pool, repo_url).await?)
    }

    async fn list_configs(&self) -> StoreResult<Vec<RepoConfig>> {
        Ok(repo_config_repository::list_all(&self.pool).await?)
    }

    async fn delete_config(&self, id: Uuid) -> StoreResult<bool> {
        Ok(repo_config_repository::delete(&self.pool, id).await?)
    }

    async fn create_pipeline(&self, record: &PipelineRecord) -> StoreResult<()> {
        pipeline_repository::create(&self.pool, record).await
    }

    async fn update_pipeline(&self, record: &PipelineRecord) -> StoreResult<bool> {
        pipeline_repository::update(&self.pool, record).await
    }

    async fn find_pipeline(&self, id: Uuid) -> StoreResult<Option<PipelineRecord>> {
        pipeline_repository::find_by_id(&self.pool, id).await
    }

    async fn list_recent_pipelines(&self, limit: usize) -> StoreResult<Vec<PipelineRecord>> {
        pipeline_repository::list_recent(&self.pool, limit).await
    }
}
