//! WebSocket event stream route.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::handlers::handle_event_stream;
use crate::AppState;

/// Create event stream routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(events_handler))
}

/// GET /events - Upgrade to a WebSocket carrying sync events.
async fn events_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_event_stream(socket, state.orchestrator))
}
