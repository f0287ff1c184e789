//! Remote store abstraction.
//!
//! The engine talks to the remote through [`Remote`]. A business-level
//! refusal is `Ok(false)`; anything that prevented the remote from answering
//! is a [`RemoteError`]. [`Transports`] pairs a primary endpoint with an
//! optional fallback tried once when the primary fails at transport level.

use std::sync::Arc;

use async_trait::async_trait;
use tether_engine::SyncableRecord;

/// Transport-level failure talking to a remote.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network unreachable, connection reset, non-2xx status
    #[error("transport error: {0}")]
    Transport(String),
    /// The remote answered with something that is not the expected JSON
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// A remote store accepting table snapshots.
///
/// `apply` must be idempotent for a given `operation_id`; the engine may
/// repeat it on retry.
#[async_trait]
pub trait Remote<T: SyncableRecord>: Send + Sync {
    /// Apply a table snapshot. `Ok(false)` means the remote refused it.
    async fn apply(&self, table: &str, records: &[T], operation_id: &str) -> Result<bool, RemoteError>;

    /// Fetch the remote snapshot of a table for merging, if supported.
    async fn fetch(&self, _table: &str) -> Result<Option<Vec<T>>, RemoteError> {
        Ok(None)
    }

    /// Short name used in logs.
    fn name(&self) -> &str {
        "remote"
    }
}

/// Primary endpoint plus optional fallback.
pub struct Transports<T: SyncableRecord> {
    primary: Arc<dyn Remote<T>>,
    fallback: Option<Arc<dyn Remote<T>>>,
}

impl<T: SyncableRecord> Clone for Transports<T> {
    fn clone(&self) -> Self {
        Self {
            primary: Arc::clone(&self.primary),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T: SyncableRecord> Transports<T> {
    pub fn new(primary: Arc<dyn Remote<T>>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    /// Adds an alternate endpoint tried once on primary transport failure.
    pub fn with_fallback(mut self, fallback: Arc<dyn Remote<T>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Apply via the primary, falling back exactly once on transport error.
    pub async fn apply(&self, table: &str, records: &[T], operation_id: &str) -> Result<bool, RemoteError> {
        match self.primary.apply(table, records, operation_id).await {
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(
                        table = %table,
                        primary = %self.primary.name(),
                        fallback = %fallback.name(),
                        error = %err,
                        "Primary transport failed, trying fallback"
                    );
                    fallback.apply(table, records, operation_id).await
                }
                None => Err(err),
            },
            result => result,
        }
    }

    /// Fetch via the primary, falling back exactly once on transport error.
    pub async fn fetch(&self, table: &str) -> Result<Option<Vec<T>>, RemoteError> {
        match self.primary.fetch(table).await {
            Err(err) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!(table = %table, error = %err, "Primary fetch failed, trying fallback");
                    fallback.fetch(table).await
                }
                None => Err(err),
            },
            result => result,
        }
    }
}
