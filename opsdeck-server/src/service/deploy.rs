//! Deploy Service
//!
//! Business logic for repo configs and deployment triggers.
//!
//! A trigger is validated, resolved to a repo config and turned into a
//! `pending` pipeline record; execution is then dispatched to the engine on
//! its own task. The trigger call never waits for the deployment.

use opsdeck_core::domain::pipeline::{PipelineRecord, Trigger, TriggerSource};
use opsdeck_core::domain::repo_config::RepoConfig;
use opsdeck_core::dto::config::ConfigRepoRequest;
use opsdeck_core::dto::pipeline::{DeploySummary, InFlightRun};
use opsdeck_core::dto::trigger::{CiCallbackPayload, UPSTREAM_SUCCESS, WebhookPayload};
use std::io::SeekFrom;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use crate::repository::{DeployRepository, StoreError};
use crate::service::engine::PipelineExecutor;
use crate::service::hub::{LogHub, Subscription};

/// Recent pipeline records included in the summary
pub const DEFAULT_SUMMARY_LIMIT: usize = 10;

/// Bytes returned from the end of a service log file
const SERVICE_LOG_TAIL_BYTES: u64 = 5120;

/// Service error type
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, DeployError>;

pub struct DeployService {
    repo: Arc<dyn DeployRepository>,
    executor: Arc<PipelineExecutor>,
    hub: LogHub,
    summary_limit: usize,
}

impl DeployService {
    pub fn new(
        repo: Arc<dyn DeployRepository>,
        executor: Arc<PipelineExecutor>,
        hub: LogHub,
        summary_limit: usize,
    ) -> Self {
        Self {
            repo,
            executor,
            hub,
            summary_limit,
        }
    }

    /// Create or update the config registered for `req.repo_url`
    pub async fn configure_repo(&self, req: ConfigRepoRequest) -> Result<RepoConfig> {
        validate_config_request(&req)?;

        let now = chrono::Utc::now();
        let existing = self.repo.find_config_by_url(&req.repo_url).await?;

        let config = RepoConfig {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |c| c.id),
            name: req.name,
            repo_url: req.repo_url,
            deploy_script: req.deploy_script,
            log_path: req.log_path.filter(|p| !p.trim().is_empty()),
            created_at: existing.as_ref().map_or(now, |c| c.created_at),
            updated_at: now,
        };

        self.repo.save_config(&config).await?;

        tracing::info!("Repo config saved: {} ({})", config.name, config.id);

        Ok(config)
    }

    /// Delete a repo config
    pub async fn delete_config(&self, id: Uuid) -> Result<()> {
        if !self.repo.delete_config(id).await? {
            return Err(config_not_found(id));
        }

        tracing::info!("Repo config deleted: {}", id);

        Ok(())
    }

    /// All configs plus the most recent pipeline records
    pub async fn get_summary(&self) -> Result<DeploySummary> {
        let services = self.repo.list_configs().await?;
        let pipelines = self
            .repo
            .list_recent_pipelines(self.summary_limit)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();

        Ok(DeploySummary {
            services,
            pipelines,
        })
    }

    /// Get a pipeline record by ID
    pub async fn get_pipeline(&self, id: Uuid) -> Result<PipelineRecord> {
        self.repo
            .find_pipeline(id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("Pipeline {} not found", id)))
    }

    /// Tail of the service log file configured for a repo
    pub async fn get_service_log(&self, config_id: Uuid) -> Result<String> {
        let config = self
            .repo
            .find_config(config_id)
            .await?
            .ok_or_else(|| config_not_found(config_id))?;

        let path = config.log_path.ok_or_else(|| {
            DeployError::Validation(format!("No log path configured for {}", config.name))
        })?;

        read_tail(&path, SERVICE_LOG_TAIL_BYTES)
            .await
            .map_err(|e| DeployError::Validation(format!("Failed to read log file {}: {}", path, e)))
    }

    /// Manually deploy a configured repo
    pub async fn trigger_deployment(&self, config_id: Uuid) -> Result<PipelineRecord> {
        let config = self
            .repo
            .find_config(config_id)
            .await?
            .ok_or_else(|| config_not_found(config_id))?;

        self.launch(config, Trigger::manual()).await
    }

    /// Deploy in response to a source-control webhook
    pub async fn handle_webhook(&self, payload: WebhookPayload) -> Result<PipelineRecord> {
        if let Some(status) = payload.status.as_deref() {
            ensure_upstream_success(status)?;
        }

        let trigger = Trigger {
            source: TriggerSource::Webhook,
            git_ref: ref_or_head(payload.git_ref),
            commit_sha: non_empty(payload.commit_sha),
            commit_msg: non_empty(payload.commit_msg),
            author: non_empty(payload.author),
        };
        validate_trigger(&trigger)?;

        let config = self.resolve_by_url(&payload.repo_url).await?;

        self.launch(config, trigger).await
    }

    /// Deploy after a CI pipeline reports a successful build
    pub async fn handle_ci_callback(&self, payload: CiCallbackPayload) -> Result<PipelineRecord> {
        ensure_upstream_success(&payload.status)?;

        let trigger = Trigger {
            source: TriggerSource::CiCd,
            git_ref: ref_or_head(payload.tag),
            commit_sha: non_empty(payload.commit_sha),
            commit_msg: non_empty(payload.commit_msg),
            author: non_empty(payload.author),
        };
        validate_trigger(&trigger)?;

        let config = self.resolve_by_url(&payload.repo_url).await?;

        self.launch(config, trigger).await
    }

    /// Deployments currently executing
    pub fn in_flight(&self) -> Vec<InFlightRun> {
        self.executor.in_flight().snapshot()
    }

    /// Live stream of log and status events of every pipeline
    pub fn subscribe(&self) -> Subscription {
        self.hub.register()
    }

    async fn resolve_by_url(&self, repo_url: &str) -> Result<RepoConfig> {
        if repo_url.trim().is_empty() {
            return Err(DeployError::Validation(
                "repo_url cannot be empty".to_string(),
            ));
        }

        self.repo
            .find_config_by_url(repo_url)
            .await?
            .ok_or_else(|| {
                DeployError::NotFound(format!("Repository not configured: {}", repo_url))
            })
    }

    async fn launch(&self, config: RepoConfig, trigger: Trigger) -> Result<PipelineRecord> {
        let record = PipelineRecord::pending(&config, trigger);
        self.repo.create_pipeline(&record).await?;

        tracing::info!(
            "Pipeline {} created for {} (trigger: {}, ref: {})",
            record.id,
            config.name,
            record.trigger_source.as_str(),
            record.git_ref
        );

        // Detached: the outcome is only visible through the record and the hub
        drop(self.executor.dispatch(record.clone(), config.deploy_script));

        Ok(record)
    }
}

fn config_not_found(id: Uuid) -> DeployError {
    DeployError::NotFound(format!("Config {} not found", id))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn ref_or_head(git_ref: Option<String>) -> String {
    non_empty(git_ref).unwrap_or_else(|| "HEAD".to_string())
}

async fn read_tail(path: &str, max_bytes: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();

    file.seek(SeekFrom::Start(len.saturating_sub(max_bytes)))
        .await?;

    let mut buf = Vec::with_capacity(len.min(max_bytes) as usize);
    file.read_to_end(&mut buf).await?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// =============================================================================
// Validation
// =============================================================================

fn ensure_upstream_success(status: &str) -> Result<()> {
    if status != UPSTREAM_SUCCESS {
        return Err(DeployError::Validation(format!(
            "Upstream reported status '{}', skipping deployment",
            status
        )));
    }
    Ok(())
}

fn validate_config_request(req: &ConfigRepoRequest) -> Result<()> {
    let fields = [
        ("name", &req.name, 100),
        ("repo_url", &req.repo_url, 255),
        ("deploy_script", &req.deploy_script, 255),
    ];

    for (field, value, max_len) in fields {
        if value.trim().is_empty() {
            return Err(DeployError::Validation(format!("{} cannot be empty", field)));
        }

        ensure_max_len(field, value, max_len)?;
    }

    Ok(())
}

/// Commit metadata must fit the columns it is stored in
fn validate_trigger(trigger: &Trigger) -> Result<()> {
    ensure_max_len("ref", &trigger.git_ref, 255)?;

    if let Some(sha) = &trigger.commit_sha {
        ensure_max_len("commit_sha", sha, 100)?;
    }

    if let Some(author) = &trigger.author {
        ensure_max_len("author", author, 100)?;
    }

    Ok(())
}

fn ensure_max_len(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.chars().count() > max_len {
        return Err(DeployError::Validation(format!(
            "{} is too long (max {} characters)",
            field, max_len
        )));
    }
    Ok(())
}
