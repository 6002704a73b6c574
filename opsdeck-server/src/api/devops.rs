//! DevOps API Handlers
//!
//! HTTP endpoints for repo configs, deployments and trigger callbacks.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use opsdeck_core::domain::pipeline::PipelineRecord;
use opsdeck_core::domain::repo_config::RepoConfig;
use opsdeck_core::dto::config::ConfigRepoRequest;
use opsdeck_core::dto::pipeline::{DeploySummary, InFlightRun};
use opsdeck_core::dto::trigger::{CiCallbackPayload, TriggerDeployment, WebhookPayload};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /config
/// Create or update the config of a repository
pub async fn configure_repo(
    State(state): State<AppState>,
    Json(req): Json<ConfigRepoRequest>,
) -> ApiResult<Json<RepoConfig>> {
    tracing::info!("Configuring repo: {}", req.repo_url);

    let config = state.deploy.configure_repo(req).await?;

    Ok(Json(config))
}

/// DELETE /config/{id}
pub async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting config: {}", id);

    state.deploy.delete_config(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /summary
/// Configured services and recent pipelines
pub async fn get_summary(State(state): State<AppState>) -> ApiResult<Json<DeploySummary>> {
    tracing::debug!("Getting deploy summary");

    let summary = state.deploy.get_summary().await?;

    Ok(Json(summary))
}

/// POST /deploy
/// Manually trigger a deployment; returns before the script runs
pub async fn trigger_deployment(
    State(state): State<AppState>,
    Json(req): Json<TriggerDeployment>,
) -> ApiResult<(StatusCode, Json<PipelineRecord>)> {
    tracing::info!("Manual deployment requested for config {}", req.config_id);

    let record = state.deploy.trigger_deployment(req.config_id).await?;

    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// GET /pipeline/{id}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRecord>> {
    tracing::debug!("Getting pipeline: {}", id);

    let record = state.deploy.get_pipeline(id).await?;

    Ok(Json(record))
}

/// GET /running
/// Deployments currently executing
pub async fn list_running(State(state): State<AppState>) -> Json<Vec<InFlightRun>> {
    Json(state.deploy.in_flight())
}

/// GET /logs/{id}
/// Tail of a config's service log file
pub async fn get_service_log(
    State(state): State<AppState>,
    Path(config_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::debug!("Reading service log for config {}", config_id);

    let log = state.deploy.get_service_log(config_id).await?;

    Ok(Json(serde_json::json!({ "config_id": config_id, "log": log })))
}

/// POST /webhooks/github
pub async fn handle_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<(StatusCode, Json<PipelineRecord>)> {
    tracing::info!("Webhook received for {}", payload.repo_url);

    let record = state.deploy.handle_webhook(payload).await?;

    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// POST /webhooks/ci
pub async fn handle_ci_callback(
    State(state): State<AppState>,
    Json(payload): Json<CiCallbackPayload>,
) -> ApiResult<(StatusCode, Json<PipelineRecord>)> {
    tracing::info!(
        "CI callback received for {} (status: {})",
        payload.repo_url,
        payload.status
    );

    let record = state.deploy.handle_ci_callback(payload).await?;

    Ok((StatusCode::ACCEPTED, Json(record)))
}
