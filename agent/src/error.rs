//! Error handling for the sync runtime and the sidecar HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::remote::RemoteError;

/// Why a sync request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("sync already in progress for {0}")]
    InProgress(String),

    #[error("sync for {0} throttled, previous attempt too recent")]
    Throttled(String),

    #[error("offline, sync for {0} deferred")]
    Offline(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("remote rejected sync for {0}")]
    Rejected(String),

    #[error("sync task timed out")]
    Timeout,

    #[error("sync task expired before it could run")]
    Expired,

    #[error("sync task cancelled")]
    Cancelled,

    #[error("sync queue closed")]
    QueueClosed,

    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Whether this outcome counts against the table's failure statistics.
    ///
    /// Rejections that never reached the remote (contention, throttling,
    /// offline, expiry, cancellation) do not count.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::MalformedResponse(_)
                | SyncError::Rejected(_)
                | SyncError::Timeout
                | SyncError::Storage(_)
        )
    }

    /// Whether automatic retry with backoff may follow this outcome.
    pub fn is_retryable(&self) -> bool {
        self.counts_as_failure()
    }
}

impl From<tether_engine::Error> for SyncError {
    fn from(err: tether_engine::Error) -> Self {
        match err {
            tether_engine::Error::MissingOwnerScope | tether_engine::Error::InvalidOwnerScope(_) => {
                SyncError::Validation(err.to_string())
            }
            other => SyncError::Storage(other.to_string()),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(msg) => SyncError::Transport(msg),
            RemoteError::MalformedResponse(msg) => SyncError::MalformedResponse(msg),
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Sidecar HTTP error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Engine error: {0}")]
    Engine(#[from] tether_engine::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Sync(e) => {
                let status = match e {
                    SyncError::Validation(_) => StatusCode::BAD_REQUEST,
                    SyncError::InProgress(_) => StatusCode::CONFLICT,
                    SyncError::Throttled(_) => StatusCode::TOO_MANY_REQUESTS,
                    SyncError::Offline(_) => StatusCode::SERVICE_UNAVAILABLE,
                    SyncError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                tracing::debug!("Sync error: {:?}", e);
                (status, e.to_string(), None)
            }
            AppError::Engine(e) => {
                tracing::error!("Engine error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Local store error".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
