//! Table endpoint routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tether_engine::Record;

use crate::error::Result;
use crate::handlers::{
    handle_get_table, handle_put_table, handle_sync_table, SyncResponse, TableResponse, WriteResponse,
};
use crate::AppState;

/// Create table routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tables/{table}", get(get_table).put(put_table))
        .route("/tables/{table}/sync", post(sync_table))
}

/// GET /tables/{table} - Read local data and sync state.
async fn get_table(State(state): State<AppState>, Path(table): Path<String>) -> Result<Json<TableResponse>> {
    Ok(Json(handle_get_table(&state.orchestrator, &table)?))
}

/// PUT /tables/{table} - Replace local data; sync follows after the debounce.
async fn put_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(records): Json<Vec<Record>>,
) -> Result<(StatusCode, Json<WriteResponse>)> {
    let response = handle_put_table(&state.scheduler, &table, records)?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /tables/{table}/sync - Manual sync.
async fn sync_table(State(state): State<AppState>, Path(table): Path<String>) -> Result<Json<SyncResponse>> {
    Ok(Json(handle_sync_table(&state.orchestrator, &table).await?))
}
