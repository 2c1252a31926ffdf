//! Collaborator-facing token endpoints under `/api/broker`.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use cadence_broker::{AuditEntry, IssuedToken, TaskRecord, TaskScope};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc};

use crate::{app::AppState, error::ApiResult};

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub token: String,
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub task_id: Option<String>,
    pub limit: Option<usize>,
}

/// POST /api/broker/tasks/{task_id}/token
///
/// Optional body `{"repos": [...], "kind": "..."}` sets the task's scope.
/// Without a body the task keeps the scope it was last issued with.
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    scope: Result<Option<Json<TaskScope>>, JsonRejection>,
) -> ApiResult<Json<IssuedToken>> {
    let scope = scope?.map(|Json(scope)| scope);
    Ok(Json(state.broker.issue(&task_id, scope)?))
}

/// DELETE /api/broker/tasks/{task_id}: idempotent.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Json<Value> {
    state.broker.revoke(&task_id);
    Json(json!({ "status": "revoked", "task_id": task_id }))
}

/// POST /api/broker/validate
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    req: Result<Json<ValidateRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = req?;
    let task_id = state.broker.validate(&req.token)?;
    Ok(Json(json!({ "task_id": task_id })))
}

/// GET /api/broker/tasks
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, TaskRecord>> {
    Json(state.broker.tasks())
}

/// GET /api/broker/audit?task_id=&limit=
pub async fn audit_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    Json(state.broker.audit(query.task_id.as_deref(), query.limit))
}
