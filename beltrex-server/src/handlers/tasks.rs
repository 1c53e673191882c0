//! Start/stop/inspect pipeline tasks.

use axum::extract::State;
use axum::response::Json;
use beltrex_model::{StartOptions, TaskSnapshot};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub classifier: Option<String>,
    #[serde(default)]
    pub settings: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopTaskRequest {
    pub thread_id: String,
}

/// Empty strings from the UI mean "absent".
fn normalize(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

pub async fn start_task(
    State(state): State<AppState>,
    Json(request): Json<StartTaskRequest>,
) -> Result<Json<Value>, ApiError> {
    let kind = request
        .kind
        .parse()
        .map_err(|e| ApiError::bad_request(format!("{e}")))?;
    info!(
        "start-task request: {}_{} model={:?} classifier={:?} settings={:?}",
        kind, request.id, request.model, request.classifier, request.settings
    );

    let descriptor = state.config.descriptor(kind, request.id);
    let options = StartOptions {
        detector: normalize(request.model),
        classifier: normalize(request.classifier),
        params: normalize(request.settings),
    };

    let key = state
        .resources
        .supervisor
        .start_task(descriptor, options)
        .await?;
    Ok(Json(json!({ "success": true, "thread_id": key })))
}

pub async fn stop_task(
    State(state): State<AppState>,
    Json(request): Json<StopTaskRequest>,
) -> Result<Json<Value>, ApiError> {
    info!("stop-task request: {}", request.thread_id);
    let stopped = state
        .resources
        .supervisor
        .stop_task(&request.thread_id)
        .await?;
    if !stopped {
        return Err(ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "task exists but failed to stop within timeout",
        ));
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn active_tasks(
    State(state): State<AppState>,
) -> Result<Json<Vec<TaskSnapshot>>, ApiError> {
    Ok(Json(state.resources.supervisor.snapshot().await))
}
