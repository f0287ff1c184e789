//! WebSocket event stream.
//!
//! Forwards every [`SyncEvent`] to the connected UI and accepts a small set
//! of client messages (manual sync, ping).

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tether_engine::{Record, Trigger};
use tokio::sync::{broadcast, mpsc};

use crate::orchestrator::SyncOrchestrator;

/// Messages sent from the UI.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sync a table now.
    Sync {
        table: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Keep-alive ping.
    Ping,
}

/// Replies to client messages. Engine events are sent as-is.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SyncResult {
        table: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Handle an established WebSocket connection until it closes.
pub async fn handle_event_stream(socket: WebSocket, orchestrator: SyncOrchestrator<Record>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut events = orchestrator.subscribe();

    tracing::info!("Event stream client connected");

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::warn!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let forward_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(text) => {
                        if forward_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize sync event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream client lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = process_message(&text, &orchestrator).await;
                match serde_json::to_string(&reply) {
                    Ok(text) => {
                        let _ = tx.send(text);
                    }
                    Err(e) => tracing::error!("Failed to serialize reply: {}", e),
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    forward_task.abort();
    send_task.abort();
    tracing::info!("Event stream client disconnected");
}

async fn process_message(text: &str, orchestrator: &SyncOrchestrator<Record>) -> ServerMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerMessage::Error {
                message: format!("Invalid message format: {}", e),
            }
        }
    };

    match message {
        ClientMessage::Sync { table, request_id } => {
            let result = orchestrator.sync_table(&table, Trigger::Manual).await;
            ServerMessage::SyncResult {
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                table,
                request_id,
            }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
