use axum::{extract::State, Json};
use cadence_broker::BrokerSummary;
use serde::Serialize;
use std::sync::Arc;

use super::jobs::JobMap;
use crate::app::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub jobs: JobMap,
    pub broker: BrokerSummary,
    pub uptime: u64,
}

/// GET /api/status: every job plus broker counters in one read.
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        jobs: JobMap(state.scheduler.jobs()),
        broker: state.broker.summary(),
        uptime: state.uptime_secs(),
    })
}
