//! Repo config DTOs

use serde::{Deserialize, Serialize};

/// Request to create or update a repo config (upsert keyed by `repo_url`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRepoRequest {
    pub name: String,
    pub repo_url: String,
    pub deploy_script: String,
    #[serde(default)]
    pub log_path: Option<String>,
}
