//! HTTP route definitions.

mod events;
mod health;
mod tables;

use crate::AppState;
use axum::Router;

/// Create all sidecar routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(tables::routes())
        .merge(events::routes())
}
