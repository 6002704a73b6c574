//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{PipelineRecord, PipelineStatus, TriggerSource};
use crate::domain::repo_config::RepoConfig;

/// Pipeline record without its accumulated log, for list views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub config_id: Uuid,
    pub repo_name: String,
    pub status: PipelineStatus,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit_sha: Option<String>,
    pub commit_msg: Option<String>,
    pub author: Option<String>,
    pub trigger_source: TriggerSource,
    pub duration: Option<i64>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRecord> for PipelineSummary {
    fn from(record: PipelineRecord) -> Self {
        Self {
            id: record.id,
            config_id: record.config_id,
            repo_name: record.repo_name,
            status: record.status,
            git_ref: record.git_ref,
            commit_sha: record.commit_sha,
            commit_msg: record.commit_msg,
            author: record.author,
            trigger_source: record.trigger_source,
            duration: record.duration,
            started_at: record.started_at,
            finished_at: record.finished_at,
            created_at: record.created_at,
        }
    }
}

/// Dashboard summary: configured services and the most recent pipelines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySummary {
    pub services: Vec<RepoConfig>,
    pub pipelines: Vec<PipelineSummary>,
}

/// A deployment currently executing on this server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightRun {
    pub pipeline_id: Uuid,
    pub repo_name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
