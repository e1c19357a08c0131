//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, NewTarget, ResultFilter, TargetUpdate};
use crate::scheduler::{ControlError, RunState};
use crate::stats::{RelativeWindow, TargetStats};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 1000;
const DEFAULT_RESULT_LIMIT: u32 = 1000;
const MAX_RESULT_LIMIT: u32 = 10_000;

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        DbError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
        DbError::Invalid(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        e => {
            tracing::error!("Storage error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn control_error(e: ControlError) -> Response {
    match e {
        ControlError::Storage(e) => db_error(e),
        e => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// API: Targets
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct TargetsQuery {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub skip: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn handle_get_targets(
    State(state): State<AppState>,
    Query(query): Query<TargetsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return (
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", MAX_PAGE_SIZE),
        )
            .into_response();
    }

    let region = query.region.as_deref().filter(|r| !r.is_empty() && *r != "all");
    match state
        .store
        .page_targets(region, query.is_active, query.skip.unwrap_or(0), limit)
    {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_target(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.get_target(id) {
        Ok(target) => Json(target).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<NewTarget>,
) -> impl IntoResponse {
    match state.store.add_target(&req) {
        Ok(target) => {
            tracing::info!("Added target {} ({}:{})", target.id, target.public_ip, target.port);
            (StatusCode::CREATED, Json(target)).into_response()
        }
        Err(e) => db_error(e),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TargetUpdate>,
) -> impl IntoResponse {
    match state.store.update_target(id, &req) {
        Ok(target) => Json(target).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_toggle_target(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.toggle_target(id) {
        Ok(target) => {
            tracing::info!("Target {} is now {}", id, if target.is_active { "active" } else { "inactive" });
            Json(target).into_response()
        }
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.delete_target(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub target_ids: Vec<i64>,
}

pub async fn handle_batch_delete_targets(
    State(state): State<AppState>,
    Json(req): Json<BatchDeleteRequest>,
) -> impl IntoResponse {
    if req.target_ids.is_empty() {
        return (StatusCode::BAD_REQUEST, "target_ids must not be empty").into_response();
    }

    match state.store.delete_targets(&req.target_ids) {
        Ok(deleted) => Json(json!({ "deleted": deleted })).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_regions(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_regions() {
        Ok(regions) => Json(regions).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Settings
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ProbeIntervalRequest {
    pub value: u64,
}

pub async fn handle_get_probe_interval(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "probe_interval": state.scheduler.control().interval_secs() }))
}

pub async fn handle_set_probe_interval(
    State(state): State<AppState>,
    Json(req): Json<ProbeIntervalRequest>,
) -> impl IntoResponse {
    match state.scheduler.control().set_interval(req.value) {
        Ok(()) => Json(json!({ "probe_interval": req.value })).into_response(),
        Err(e) => control_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskStatusRequest {
    pub status: String,
}

pub async fn handle_get_task_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "task_status": state.scheduler.control().run_state() }))
}

pub async fn handle_set_task_status(
    State(state): State<AppState>,
    Json(req): Json<TaskStatusRequest>,
) -> impl IntoResponse {
    let result = req
        .status
        .parse::<RunState>()
        .and_then(|s| state.scheduler.control().set_run_state(s).map(|_| s));

    match result {
        Ok(s) => Json(json!({ "task_status": s })).into_response(),
        Err(e) => control_error(e),
    }
}

// ============================================================================
// API: Probing
// ============================================================================

pub async fn handle_run_cycle(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.run_cycle().await)
}

// ============================================================================
// API: Stats
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub targets: Vec<TargetStats>,
    pub time_range: String,
    pub region_filter: Option<String>,
    pub total_targets: usize,
}

fn parse_window(raw: Option<&str>, default: RelativeWindow) -> Result<RelativeWindow, Response> {
    match raw {
        None => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|e: crate::stats::RangeError| (StatusCode::BAD_REQUEST, e.to_string()).into_response()),
    }
}

pub async fn handle_get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    let window = match parse_window(query.time_range.as_deref(), RelativeWindow::default()) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    match state.stats.summarize(window.resolve(Utc::now()), query.region.as_deref()) {
        Ok(targets) => Json(StatsResponse {
            total_targets: targets.len(),
            targets,
            time_range: query.time_range.unwrap_or_else(|| window.to_string()),
            region_filter: query.region,
        })
        .into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_summary(State(state): State<AppState>) -> impl IntoResponse {
    match state.stats.fleet_summary(Utc::now()) {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Results
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn handle_get_results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> impl IntoResponse {
    let last_day = match RelativeWindow::days(1) {
        Ok(w) => w,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let window = match parse_window(query.time_range.as_deref(), last_day) {
        Ok(w) => w,
        Err(resp) => return resp,
    };
    let range = window.resolve(Utc::now());

    let filter = ResultFilter {
        target_id: query.target_id,
        region: query.region.filter(|r| !r.is_empty() && r != "all"),
        limit: query.limit.unwrap_or(DEFAULT_RESULT_LIMIT).clamp(1, MAX_RESULT_LIMIT),
        ..ResultFilter::between(range.start, range.end)
    };

    match state.store.query_results(&filter) {
        Ok(results) => Json(results).into_response(),
        Err(e) => db_error(e),
    }
}
