//! Monitor API Handler
//!
//! Recent host metrics history.

use axum::{Json, extract::State};
use opsdeck_core::domain::metric::SystemMetric;
use std::collections::BTreeMap;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /monitor/stats
/// Samples of every series, oldest first
pub async fn get_stats(
    State(state): State<AppState>,
) -> ApiResult<Json<BTreeMap<String, Vec<SystemMetric>>>> {
    let metrics = state.metrics.get_metrics().await?;

    Ok(Json(metrics))
}
