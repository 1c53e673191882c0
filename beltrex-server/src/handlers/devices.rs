//! Device discovery and health snapshots across every configured upstream.

use std::collections::HashMap;

use axum::extract::State;
use axum::response::Json;
use beltrex_model::{ServerStatus, SourceKind};
use serde::Serialize;
use tracing::debug;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectedDevice {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub id: u32,
    pub info: String,
    pub ip: String,
    pub status: String,
}

async fn query_upstream(state: &AppState, kind: SourceKind) -> Vec<ConnectedDevice> {
    let url = state.config.health_url(kind);
    match state.resources.client.devices(&url, None).await {
        Ok(devices) => devices
            .into_iter()
            .map(|device| {
                let ip = match kind {
                    SourceKind::Legacy => device
                        .info
                        .split(';')
                        .next()
                        .unwrap_or("unknown")
                        .to_string(),
                    _ => "localhost".to_string(),
                };
                ConnectedDevice {
                    kind,
                    id: device.id,
                    info: device.info,
                    ip,
                    status: device.status,
                }
            })
            .collect(),
        Err(err) => {
            debug!("{kind} server device query failed: {err}");
            Vec::new()
        }
    }
}

/// Query every upstream concurrently; unreachable ones just contribute
/// nothing.
pub async fn connected_devices(State(state): State<AppState>) -> Json<Vec<ConnectedDevice>> {
    let (webcam, legacy, simulator) = tokio::join!(
        query_upstream(&state, SourceKind::Webcam),
        query_upstream(&state, SourceKind::Legacy),
        query_upstream(&state, SourceKind::Simulator),
    );

    let mut devices = Vec::new();
    devices.extend(legacy);
    devices.extend(webcam);
    devices.extend(simulator);
    Json(devices)
}

pub async fn health_status(
    State(state): State<AppState>,
) -> Json<HashMap<String, ServerStatus>> {
    Json(state.resources.health.snapshot())
}
