//! Worker statistics surface.

use axum::extract::State;
use axum::response::Json;
use beltrex_core::registry::WorkerStatsReport;

use crate::AppState;

pub async fn worker_stats(State(state): State<AppState>) -> Json<WorkerStatsReport> {
    Json(state.resources.worker_stats().await)
}
