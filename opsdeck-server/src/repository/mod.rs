//! Repository Module
//!
//! Data access layer for the server.
//! `DeployRepository` is the persistence seam used by the services; it is
//! backed by Postgres (`PgRepository`) or by memory (`InMemoryRepository`).
//! `MetricsStore` is the key-value seam behind the metrics ring buffer.

pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod postgres;
pub mod repo_config;

// Re-export for convenience
pub use memory::InMemoryRepository;
pub use metrics::{InMemoryMetricsStore, MetricsStore, RedisMetricsStore};
pub use pipeline as pipeline_repository;
pub use postgres::PgRepository;
pub use repo_config as repo_config_repository;

use async_trait::async_trait;
use opsdeck_core::domain::pipeline::PipelineRecord;
use opsdeck_core::domain::repo_config::RepoConfig;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a backing store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("metrics store error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence of repo configs and pipeline records
///
/// Each call is atomic on its own; nothing spans a multi-step transaction.
#[async_trait]
pub trait DeployRepository: Send + Sync {
    /// Inserts or updates a config, keyed by `repo_url`
    async fn save_config(&self, config: &RepoConfig) -> StoreResult<()>;

    async fn find_config(&self, id: Uuid) -> StoreResult<Option<RepoConfig>>;

    async fn find_config_by_url(&self, repo_url: &str) -> StoreResult<Option<RepoConfig>>;

    /// All configs, newest first
    async fn list_configs(&self) -> StoreResult<Vec<RepoConfig>>;

    /// Returns false when no config had this id
    async fn delete_config(&self, id: Uuid) -> StoreResult<bool>;

    async fn create_pipeline(&self, record: &PipelineRecord) -> StoreResult<()>;

    /// Writes every mutable column of the record in one statement
    async fn update_pipeline(&self, record: &PipelineRecord) -> StoreResult<bool>;

    async fn find_pipeline(&self, id: Uuid) -> StoreResult<Option<PipelineRecord>>;

    /// Most recent records first, at most `limit`
    async fn list_recent_pipelines(&self, limit: usize) -> StoreResult<Vec<PipelineRecord>>;
}
