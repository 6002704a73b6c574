//! In-memory `DeployRepository`
//!
//! Used when no `DATABASE_URL` is configured, and by the service tests.
//! State is lost on restart.

use async_trait::async_trait;
use opsdeck_core::domain::pipeline::PipelineRecord;
use opsdeck_core::domain::repo_config::RepoConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::repository::{DeployRepository, StoreResult};

#[derive(Default)]
struct State {
    configs: HashMap<Uuid, RepoConfig>,
    pipelines: HashMap<Uuid, PipelineRecord>,
}

/// Thread-safe in-memory store for configs and pipeline records
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeployRepository for InMemoryRepository {
    async fn save_config(&self, config: &RepoConfig) -> StoreResult<()> {
        let mut state = self.state();

        let previous = state
            .configs
            .values()
            .find(|c| c.repo_url == config.repo_url)
            .map(|c| (c.id, c.created_at));

        let mut config = config.clone();
        if let Some((id, created_at)) = previous {
            state.configs.remove(&id);
            config.id = id;
            config.created_at = created_at;
        }

        state.configs.insert(config.id, config);
        Ok(())
    }

    async fn find_config(&self, id: Uuid) -> StoreResult<Option<RepoConfig>> {
        Ok(self.state().configs.get(&id).cloned())
    }

    async fn find_config_by_url(&self, repo_url: &str) -> StoreResult<Option<RepoConfig>> {
        Ok(self
            .state()
            .configs
            .values()
            .find(|c| c.repo_url == repo_url)
            .cloned())
    }

    async fn list_configs(&self) -> StoreResult<Vec<RepoConfig>> {
        let mut configs: Vec<RepoConfig> = self.state().configs.values().cloned().collect();
        configs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(configs)
    }

    async fn delete_config(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.state().configs.remove(&id).is_some())
    }

    async fn create_pipeline(&self, record: &PipelineRecord) -> StoreResult<()> {
        self.state().pipelines.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_pipeline(&self, record: &PipelineRecord) -> StoreResult<bool> {
        let mut state = self.state();
        match state.pipelines.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_pipeline(&self, id: Uuid) -> StoreResult<Option<PipelineRecord>> {
        Ok(self.state().pipelines.get(&id).cloned())
    }

    async fn list_recent_pipelines(&self, limit: usize) -> StoreResult<Vec<PipelineRecord>> {
        let mut records: Vec<PipelineRecord> =
            self.state().pipelines.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdeck_core::domain::pipeline::Trigger;

    fn config(name: &str, url: &str) -> RepoConfig {
        let now = chrono::Utc::now();
        RepoConfig {
            id: Uuid::new_v4(),
            name: name.to_string(),
            repo_url: url.to_string(),
            deploy_script: "/bin/true".to_string(),
            log_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_save_config_upserts_by_url() {
        let repo = InMemoryRepository::new();
        let first = config("api", "https://git.example.com/api.git");
        repo.save_config(&first).await.unwrap();

        let second = config("api-renamed", "https://git.example.com/api.git");
        repo.save_config(&second).await.unwrap();

        let configs = repo.list_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, first.id);
        assert_eq!(configs[0].name, "api-renamed");
    }

    #[tokio::test]
    async fn test_list_recent_pipelines_is_bounded_and_newest_first() {
        let repo = InMemoryRepository::new();
        let config = config("api", "https://git.example.com/api.git");

        let mut ids = Vec::new();
        for i in 0..5 {
            let mut record = PipelineRecord::pending(&config, Trigger::manual());
            record.created_at += chrono::Duration::seconds(i);
            ids.push(record.id);
            repo.create_pipeline(&record).await.unwrap();
        }

        let recent = repo.list_recent_pipelines(3).await.unwrap();
        let recent_ids: Vec<Uuid> = recent.iter().map(|r| r.id).collect();
        assert_eq!(recent_ids, vec![ids[4], ids[3], ids[2]]);
    }

    #[tokio::test]
    async fn test_update_unknown_pipeline_reports_false() {
        let repo = InMemoryRepository::new();
        let record = PipelineRecord::pending(&config("api", "u"), Trigger::manual());

        assert!(!repo.update_pipeline(&record).await.unwrap());
        assert!(!repo.delete_config(Uuid::new_v4()).await.unwrap());
    }
}
