//! Record types the engine synchronizes.
//!
//! The engine is generic over [`SyncableRecord`]; it only needs a stable
//! identifier and, for timestamp-based merging, the record's modification
//! and creation times. [`Record`] is the JSON-backed implementation used by
//! the sidecar and most tests.

use crate::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimal capability interface for anything the engine can sync.
pub trait SyncableRecord: Clone + Send + Sync + 'static {
    /// Stable unique identifier within a table.
    fn id(&self) -> &str;

    /// When the record was last modified, if known.
    fn modified_at(&self) -> Option<DateTime<Utc>>;

    /// When the record was created, if known.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Timestamp used by newest-wins merging: modification time, then
    /// creation time, then the Unix epoch.
    fn effective_timestamp(&self) -> DateTime<Utc> {
        self.modified_at()
            .or_else(|| self.created_at())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// A JSON-backed record.
///
/// Only `id` and the two timestamps are interpreted; every other field is
/// carried through untouched in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier for this record
    pub id: RecordId,
    /// When the record was first created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_creation: Option<DateTime<Utc>>,
    /// When the record was last modified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modification: Option<DateTime<Utc>>,
    /// Remaining payload fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Create a record with no timestamps and no fields.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            date_creation: None,
            date_modification: None,
            fields: serde_json::Map::new(),
        }
    }

    /// Set the creation time.
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.date_creation = Some(at);
        self
    }

    /// Set the modification time.
    pub fn modified(mut self, at: DateTime<Utc>) -> Self {
        self.date_modification = Some(at);
        self
    }

    /// Set a payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Get a payload field.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

impl SyncableRecord for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.date_modification
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.date_creation
    }
}
