//! Job endpoints under `/api/jobs`.

use axum::{
    extract::{Path, State},
    Json,
};
use cadence_scheduler::{JobSnapshot, TriggerOutcome};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};

/// Jobs keyed by name, serialized in registry order.
pub struct JobMap(pub Vec<JobSnapshot>);

impl Serialize for JobMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|job| (&job.name, job)))
    }
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<JobMap> {
    Json(JobMap(state.scheduler.jobs()))
}

/// GET /api/jobs/{name}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.scheduler.job(&name)?))
}

/// POST /api/jobs/{name}/trigger: returns once the run has been handed off.
pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    match state.scheduler.trigger(&name)? {
        TriggerOutcome::Started { run_id } => Ok(Json(json!({
            "status": "triggered",
            "run_id": run_id,
        }))),
        TriggerOutcome::AlreadyRunning => Err(ApiError::AlreadyRunning),
    }
}

/// POST /api/jobs/{name}/enable
pub async fn enable_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.scheduler.enable(&name)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /api/jobs/{name}/disable
pub async fn disable_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    state.scheduler.disable(&name)?;
    Ok(Json(json!({ "status": "ok" })))
}
