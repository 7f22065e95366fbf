//! Entity endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{CheckResponse, HistoryQuery, MonitoringToggle},
};
use crate::storage::{StatusChange, TrackedEntity};

/// GET /api/v1/monitors/:class/entities
pub async fn list_entities(
    State(state): State<ApiState>,
    Path(class): Path<String>,
) -> ApiResult<Json<Vec<TrackedEntity>>> {
    let class = state.scheduler(&class)?.reconciler().class();
    Ok(Json(state.store.list_entities(class).await?))
}

/// GET /api/v1/monitors/:class/entities/:key
pub async fn get_entity(
    State(state): State<ApiState>,
    Path((class, key)): Path<(String, String)>,
) -> ApiResult<Json<TrackedEntity>> {
    let class = state.scheduler(&class)?.reconciler().class();
    state
        .store
        .get_entity(class, &key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{class} entity {key} not found")))
}

/// POST /api/v1/monitors/:class/entities/:key/check
///
/// Probes the entity now, even when its monitoring is disabled
pub async fn check_entity(
    State(state): State<ApiState>,
    Path((class, key)): Path<(String, String)>,
) -> ApiResult<Json<CheckResponse>> {
    let scheduler = state.scheduler(&class)?;
    let status = scheduler.check_one(&key).await?;
    Ok(Json(CheckResponse { key, status }))
}

/// PUT /api/v1/monitors/:class/entities/:key/monitoring
pub async fn set_monitoring(
    State(state): State<ApiState>,
    Path((class, key)): Path<(String, String)>,
    Json(toggle): Json<MonitoringToggle>,
) -> ApiResult<Json<MonitoringToggle>> {
    let scheduler = state.scheduler(&class)?;
    scheduler
        .reconciler()
        .set_monitoring(&key, toggle.enabled)
        .await?;
    Ok(Json(toggle))
}

/// GET /api/v1/monitors/:class/entities/:key/history
pub async fn get_history(
    State(state): State<ApiState>,
    Path((class, key)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<StatusChange>>> {
    let class = state.scheduler(&class)?.reconciler().class();
    let limit = query.limit.unwrap_or(50).min(500);
    Ok(Json(state.store.status_history(class, &key, limit).await?))
}
