//! Trigger DTOs
//!
//! Payloads that start a deployment: manual trigger, source-control webhook
//! and CI completion callback.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status value upstream systems report for a successful build
pub const UPSTREAM_SUCCESS: &str = "success";

/// Manual deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDeployment {
    pub config_id: Uuid,
}

/// Source-control webhook payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub repo_url: String,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub commit_msg: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Optional upstream status; anything but "success" is rejected
    #[serde(default)]
    pub status: Option<String>,
}

/// CI completion callback payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiCallbackPayload {
    pub repo_url: String,
    pub status: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub commit_msg: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}
