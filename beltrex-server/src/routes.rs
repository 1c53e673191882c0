use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{devices, stats, tasks, video};
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Task lifecycle
        .route("/start-task", post(tasks::start_task))
        .route("/stop-task", post(tasks::stop_task))
        .route("/active-tasks", get(tasks::active_tasks))
        // Discovery and health
        .route("/connected-devices", get(devices::connected_devices))
        .route("/health-status", get(devices::health_status))
        .route("/worker-stats", get(stats::worker_stats))
        // Visualization (independent of data collection)
        .route("/video", get(video::webcam_video))
        .route("/legacy-camera-video/{device_id}", get(video::legacy_video))
        .route("/simulator-video", get(video::simulator_video))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
