// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Thin operator-facing HTTP surface — started only when `api.enabled` is
//! set in configuration. Carries no business logic of its own; every
//! handler just reads state off the already-running [`GatewayApp`].
//!
//! Endpoints:
//!   GET /health          → liveness probe, always 200 once the process is up
//!   GET /status          → degraded-mode flag, camera count, task summary
//!   GET /tasks/:id        → one task's current state

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::app::GatewayApp;
use crate::models::TaskRecord;

pub fn router(app: Arc<GatewayApp>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/tasks/{id}", get(task_status))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

pub async fn serve(app: Arc<GatewayApp>, port: u16) -> std::io::Result<()> {
    let router = router(app);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "status surface listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct StatusResponse {
    degraded: bool,
    last_sync: chrono::DateTime<chrono::Utc>,
    camera_count: usize,
    pending_tasks: usize,
    device_id: String,
}

async fn status(State(app): State<Arc<GatewayApp>>) -> impl IntoResponse {
    let degraded = app.degraded_status();
    let tasks = app.task_executor.list();
    let pending_tasks = tasks
        .iter()
        .filter(|t| matches!(t.state, crate::models::TaskState::Pending | crate::models::TaskState::Running))
        .count();

    Json(StatusResponse {
        degraded: degraded.degraded,
        last_sync: degraded.last_sync,
        camera_count: app.registry.list().len(),
        pending_tasks,
        device_id: app.config.device.device_id.clone(),
    })
}

async fn task_status(State(app): State<Arc<GatewayApp>>, Path(task_id): Path<String>) -> impl IntoResponse {
    let record: TaskRecord = app.task_executor.get(&task_id);
    if record.state == crate::models::TaskState::Failed && record.message == "Task not found" {
        return (StatusCode::NOT_FOUND, Json(record));
    }
    (StatusCode::OK, Json(record))
}
