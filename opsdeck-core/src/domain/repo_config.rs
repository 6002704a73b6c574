//! Repository configuration domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A deployable target
///
/// `repo_url` is unique and is the lookup key for webhook and CI triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub id: Uuid,
    pub name: String,
    pub repo_url: String,
    pub deploy_script: String,
    pub log_path: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
