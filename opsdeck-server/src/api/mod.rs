//! API Module
//!
//! HTTP API layer of the deployment server.
//! Each submodule handles endpoints for a specific domain.

pub mod devops;
pub mod error;
pub mod events;
pub mod health;
pub mod monitor;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::service::{DeployService, MetricsService};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub deploy: Arc<DeployService>,
    pub metrics: Arc<MetricsService>,
    /// Cancelled when the server starts shutting down; ends open event streams
    pub shutdown: CancellationToken,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let devops = Router::new()
        // Live log stream
        .route("/events", get(events::stream_events))
        // Repo configs
        .route("/config", post(devops::configure_repo))
        .route("/config/{id}", delete(devops::delete_config))
        .route("/logs/{id}", get(devops::get_service_log))
        // Deployments
        .route("/summary", get(devops::get_summary))
        .route("/deploy", post(devops::trigger_deployment))
        .route("/pipeline/{id}", get(devops::get_pipeline))
        .route("/running", get(devops::list_running))
        // Trigger callbacks
        .route("/webhooks/github", post(devops::handle_webhook))
        .route("/webhooks/ci", post(devops::handle_ci_callback))
        // Host metrics
        .route("/monitor/stats", get(monitor::get_stats));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1/devops", devops)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
