//! Health and status endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tether_engine::{MonitorStatus, TableName};

use crate::error::Result;
use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub online: bool,
}

/// Engine status response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub online: bool,
    pub monitor: MonitorStatus,
    pub pending_tables: Vec<TableName>,
    pub scheduled_retries: Vec<TableName>,
    pub queued: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        online: state.orchestrator.connectivity().is_online(),
    })
}

/// GET /status - monitor snapshot plus queue and retry state.
async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    let orchestrator = &state.orchestrator;
    Ok(Json(StatusResponse {
        online: orchestrator.connectivity().is_online(),
        monitor: orchestrator.status(),
        pending_tables: orchestrator.pending_tables()?,
        scheduled_retries: orchestrator.scheduled_retries(),
        queued: orchestrator.queued(),
    }))
}

/// Root handler.
async fn root() -> &'static str {
    "Tether Sync Agent"
}
