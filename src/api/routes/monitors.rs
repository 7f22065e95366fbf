//! Monitor class endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::MonitorSummary,
};
use crate::monitor::{Scheduler, SyncReport};
use crate::storage::ArchiveRecord;

async fn summary(state: &ApiState, scheduler: &Arc<Scheduler>) -> ApiResult<MonitorSummary> {
    let status = scheduler.status();
    let counts = state.store.stats(status.class).await?;
    Ok(MonitorSummary {
        scheduler: status,
        counts,
    })
}

/// GET /api/v1/monitors
pub async fn list_monitors(State(state): State<ApiState>) -> ApiResult<Json<Vec<MonitorSummary>>> {
    let mut monitors = Vec::new();
    for scheduler in state.schedulers() {
        monitors.push(summary(&state, scheduler).await?);
    }
    Ok(Json(monitors))
}

/// GET /api/v1/monitors/:class
pub async fn get_monitor(
    State(state): State<ApiState>,
    Path(class): Path<String>,
) -> ApiResult<Json<MonitorSummary>> {
    let scheduler = state.scheduler(&class)?;
    Ok(Json(summary(&state, scheduler).await?))
}

/// POST /api/v1/monitors/:class/start
pub async fn start_monitor(
    State(state): State<ApiState>,
    Path(class): Path<String>,
) -> ApiResult<Json<Value>> {
    let scheduler = state.scheduler(&class)?;
    let started = scheduler.start();
    Ok(Json(json!({
        "started": started,
        "status": scheduler.status(),
    })))
}

/// POST /api/v1/monitors/:class/stop
pub async fn stop_monitor(
    State(state): State<ApiState>,
    Path(class): Path<String>,
) -> ApiResult<Json<Value>> {
    let scheduler = state.scheduler(&class)?;
    let stopped = scheduler.stop();
    Ok(Json(json!({
        "stopped": stopped,
        "status": scheduler.status(),
    })))
}

/// POST /api/v1/monitors/:class/sync
///
/// Runs a sync pass and waits for its report
pub async fn sync(
    State(state): State<ApiState>,
    Path(class): Path<String>,
) -> ApiResult<Json<SyncReport>> {
    let scheduler = state.scheduler(&class)?;
    Ok(Json(scheduler.sync().await?))
}

/// POST /api/v1/monitors/:class/check
///
/// Starts a check pass in the background; progress shows up in the entity list
pub async fn check_all(
    State(state): State<ApiState>,
    Path(class): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let scheduler = state.scheduler(&class)?;
    // the handle is dropped, the pass keeps running
    let _ = scheduler.trigger_check_all();
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

/// GET /api/v1/monitors/:class/archive
pub async fn list_archive(
    State(state): State<ApiState>,
    Path(class): Path<String>,
) -> ApiResult<Json<Vec<ArchiveRecord>>> {
    let scheduler = state.scheduler(&class)?;
    let archived = state
        .store
        .list_archived(scheduler.reconciler().class())
        .await?;
    Ok(Json(archived))
}
