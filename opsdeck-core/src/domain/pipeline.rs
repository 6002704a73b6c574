//! Pipeline record domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::repo_config::RepoConfig;

/// Pipeline execution status
///
/// `Canceled` is part of the stored taxonomy but no transition produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Success | PipelineStatus::Failed)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PipelineStatus::Pending),
            "running" => Ok(PipelineStatus::Running),
            "success" => Ok(PipelineStatus::Success),
            "failed" => Ok(PipelineStatus::Failed),
            "canceled" => Ok(PipelineStatus::Canceled),
            other => Err(format!("unknown pipeline status '{}'", other)),
        }
    }
}

/// What initiated a pipeline record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Webhook,
    CiCd,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Webhook => "webhook",
            TriggerSource::CiCd => "ci_cd",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerSource::Manual),
            "webhook" => Ok(TriggerSource::Webhook),
            "ci_cd" => Ok(TriggerSource::CiCd),
            other => Err(format!("unknown trigger source '{}'", other)),
        }
    }
}

/// Trigger metadata copied onto a new pipeline record
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub source: TriggerSource,
    pub git_ref: String,
    pub commit_sha: Option<String>,
    pub commit_msg: Option<String>,
    pub author: Option<String>,
}

impl Trigger {
    pub fn manual() -> Self {
        Self {
            source: TriggerSource::Manual,
            git_ref: "manual".to_string(),
            commit_sha: None,
            commit_msg: None,
            author: None,
        }
    }
}

/// One tracked attempt to run a deploy script
///
/// `finished_at` is set if and only if the status is terminal, and
/// `duration` is computed once when that happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
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
    /// Whole seconds between `started_at` and `finished_at`
    pub duration: Option<i64>,
    /// Accumulated script output, written at the terminal transition
    pub log: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Rejected status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: PipelineStatus,
    pub to: PipelineStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pipeline transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

impl PipelineRecord {
    /// Creates a `pending` record for the given config
    pub fn pending(config: &RepoConfig, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_id: config.id,
            repo_name: config.name.clone(),
            status: PipelineStatus::Pending,
            git_ref: trigger.git_ref,
            commit_sha: trigger.commit_sha,
            commit_msg: trigger.commit_msg,
            author: trigger.author,
            trigger_source: trigger.source,
            duration: None,
            log: None,
            started_at: None,
            finished_at: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// `pending -> running`, stamping `started_at`
    pub fn start(&mut self, at: chrono::DateTime<chrono::Utc>) -> Result<(), TransitionError> {
        if self.status != PipelineStatus::Pending {
            return Err(TransitionError {
                from: self.status,
                to: PipelineStatus::Running,
            });
        }

        self.status = PipelineStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    /// Moves into a terminal state, stamping `finished_at` and the duration
    pub fn finish(
        &mut self,
        status: PipelineStatus,
        at: chrono::DateTime<chrono::Utc>,
        log: String,
    ) -> Result<(), TransitionError> {
        if !status.is_terminal() || self.status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                to: status,
            });
        }

        self.status = status;
        self.finished_at = Some(at);
        self.duration = self
            .started_at
            .map(|started| (at - started).num_seconds());
        self.log = Some(log);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn config() -> RepoConfig {
        let now = Utc::now();
        RepoConfig {
            id: Uuid::new_v4(),
            name: "web".to_string(),
            repo_url: "https://git.example.com/web.git".to_string(),
            deploy_script: "/opt/deploy/web.sh".to_string(),
            log_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_pending_record_from_manual_trigger() {
        let config = config();
        let record = PipelineRecord::pending(&config, Trigger::manual());

        assert_eq!(record.status, PipelineStatus::Pending);
        assert_eq!(record.config_id, config.id);
        assert_eq!(record.repo_name, "web");
        assert_eq!(record.git_ref, "manual");
        assert_eq!(record.trigger_source, TriggerSource::Manual);
        assert!(record.started_at.is_none());
        assert!(record.finished_at.is_none());
        assert!(record.duration.is_none());
    }

    #[test]
    fn test_finish_truncates_duration_to_seconds() {
        let mut record = PipelineRecord::pending(&config(), Trigger::manual());
        let started = Utc::now();

        record.start(started).unwrap();
        assert_eq!(record.status, PipelineStatus::Running);
        assert!(record.finished_at.is_none());

        let finished = started + Duration::milliseconds(2_900);
        record
            .finish(PipelineStatus::Success, finished, "ok\n".to_string())
            .unwrap();

        assert_eq!(record.finished_at, Some(finished));
        assert_eq!(record.duration, Some(2));
        assert_eq!(record.log.as_deref(), Some("ok\n"));
    }

    #[test]
    fn test_terminal_record_is_never_recomputed() {
        let mut record = PipelineRecord::pending(&config(), Trigger::manual());
        let started = Utc::now();
        record.start(started).unwrap();
        record
            .finish(PipelineStatus::Failed, started + Duration::seconds(3), String::new())
            .unwrap();

        let again = record.finish(
            PipelineStatus::Success,
            started + Duration::seconds(60),
            String::new(),
        );

        assert!(again.is_err());
        assert_eq!(record.status, PipelineStatus::Failed);
        assert_eq!(record.duration, Some(3));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut record = PipelineRecord::pending(&config(), Trigger::manual());
        let now = Utc::now();

        assert!(record.finish(PipelineStatus::Running, now, String::new()).is_err());
        assert!(record.finish(PipelineStatus::Canceled, now, String::new()).is_err());

        record.start(now).unwrap();
        assert!(record.start(now).is_err());
    }

    #[test]
    fn test_status_round_trips_through_storage_strings() {
        for status in [
            PipelineStatus::Pending,
            PipelineStatus::Running,
            PipelineStatus::Success,
            PipelineStatus::Failed,
            PipelineStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<PipelineStatus>(), Ok(status));
        }
        assert!("bogus".parse::<PipelineStatus>().is_err());
        assert_eq!("ci_cd".parse::<TriggerSource>(), Ok(TriggerSource::CiCd));
    }
}
