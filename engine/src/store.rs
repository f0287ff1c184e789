//! Local Store - the write-ahead copy of everything the user edited.
//!
//! Data lives in a host-supplied [`KeyValueStore`], partitioned by owner
//! scope. For a table `T` and scope `S` the keys are:
//!
//! - `T_S` - JSON array of records
//! - `T_S_last_modified` - epoch millis of the last local write
//! - `T_S_last_synced` - epoch millis of the last successful sync
//! - `T_S_syncing` - pending marker ([`PendingSyncEntry`] metadata)
//!
//! Table names may contain `_`, so keys are never split back into a table
//! and a scope. Each scope keeps the list of tables it has touched under
//! `tether:tables:S`, and enumeration goes through that list. Scopes must not
//! contain `_`, which keeps `T_S` unique across scopes.
//!
//! Writes are last-write-wins; there is no concurrency token.

use crate::{error::Result, Error, SyncableRecord, TableName, Timestamp};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

const LAST_MODIFIED_SUFFIX: &str = "_last_modified";
const LAST_SYNCED_SUFFIX: &str = "_last_synced";
const PENDING_SUFFIX: &str = "_syncing";
const TABLE_INDEX_PREFIX: &str = "tether:tables:";

/// Host-supplied key/value persistence.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, overwriting any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// List every key currently stored.
    fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// Pending marker stored under the `_syncing` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingMarker {
    table: TableName,
    owner_scope: String,
    enqueued_at: Timestamp,
}

/// Local data that has diverged from the last successful sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncEntry<T> {
    pub table: TableName,
    pub owner_scope: String,
    pub payload: Vec<T>,
    pub enqueued_at: Timestamp,
}

/// Typed view over a [`KeyValueStore`] for one owner scope.
pub struct LocalStore<T> {
    backend: Arc<dyn KeyValueStore>,
    owner_scope: String,
    _records: PhantomData<fn() -> T>,
}

impl<T> Clone for LocalStore<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            owner_scope: self.owner_scope.clone(),
            _records: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for LocalStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("owner_scope", &self.owner_scope)
            .finish_non_exhaustive()
    }
}

impl<T> LocalStore<T>
where
    T: SyncableRecord + Serialize + DeserializeOwned,
{
    /// Create a store for an owner scope.
    ///
    /// Fails with [`Error::MissingOwnerScope`] if the scope is blank and
    /// [`Error::InvalidOwnerScope`] if it contains the `_` key separator.
    pub fn new(backend: Arc<dyn KeyValueStore>, owner_scope: impl Into<String>) -> Result<Self> {
        let owner_scope = owner_scope.into();
        if owner_scope.trim().is_empty() {
            return Err(Error::MissingOwnerScope);
        }
        if owner_scope.contains('_') {
            return Err(Error::InvalidOwnerScope(owner_scope));
        }
        Ok(Self {
            backend,
            owner_scope,
            _records: PhantomData,
        })
    }

    /// The owner scope this store is partitioned under.
    pub fn owner_scope(&self) -> &str {
        &self.owner_scope
    }

    /// Base key for a table.
    pub fn data_key(&self, table: &str) -> String {
        format!("{}_{}", table, self.owner_scope)
    }

    fn meta_key(&self, table: &str, suffix: &str) -> String {
        format!("{}{}", self.data_key(table), suffix)
    }

    fn index_key(&self) -> String {
        format!("{}{}", TABLE_INDEX_PREFIX, self.owner_scope)
    }

    /// Tables this scope has written or marked, sorted by name.
    pub fn tables(&self) -> Result<Vec<TableName>> {
        Ok(self.table_index()?.into_iter().collect())
    }

    fn table_index(&self) -> Result<BTreeSet<TableName>> {
        match self.backend.get(&self.index_key())? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeSet::new()),
        }
    }

    fn register(&self, table: &str) -> Result<()> {
        let mut index = self.table_index()?;
        if index.insert(table.to_string()) {
            self.backend
                .set(&self.index_key(), &serde_json::to_string(&index)?)?;
        }
        Ok(())
    }

    /// Persist a table's records and stamp the write time.
    pub fn write(&self, table: &str, records: &[T], now: Timestamp) -> Result<()> {
        self.register(table)?;
        let payload = serde_json::to_string(records)?;
        self.backend.set(&self.data_key(table), &payload)?;
        self.backend.set(
            &self.meta_key(table, LAST_MODIFIED_SUFFIX),
            &now.to_string(),
        )?;
        Ok(())
    }

    /// Read a table's records. A table never written reads as empty.
    pub fn read(&self, table: &str) -> Result<Vec<T>> {
        match self.backend.get(&self.data_key(table))? {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Ok(Vec::new()),
        }
    }

    /// When the table was last written locally.
    pub fn last_modified(&self, table: &str) -> Result<Option<Timestamp>> {
        self.read_timestamp(&self.meta_key(table, LAST_MODIFIED_SUFFIX))
    }

    /// When the table last synced successfully.
    pub fn last_synced(&self, table: &str) -> Result<Option<Timestamp>> {
        self.read_timestamp(&self.meta_key(table, LAST_SYNCED_SUFFIX))
    }

    fn read_timestamp(&self, key: &str) -> Result<Option<Timestamp>> {
        match self.backend.get(key)? {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Error::Serialization(format!("invalid timestamp under {key}"))),
            None => Ok(None),
        }
    }

    /// Mark a table as diverged from the remote.
    ///
    /// An existing marker keeps its original `enqueued_at`.
    pub fn mark_pending(&self, table: &str, now: Timestamp) -> Result<()> {
        if self.pending_marker(table)?.is_some() {
            return Ok(());
        }
        self.register(table)?;
        let marker = PendingMarker {
            table: table.to_string(),
            owner_scope: self.owner_scope.clone(),
            enqueued_at: now,
        };
        self.backend.set(
            &self.meta_key(table, PENDING_SUFFIX),
            &serde_json::to_string(&marker)?,
        )
    }

    fn pending_marker(&self, table: &str) -> Result<Option<PendingMarker>> {
        match self.backend.get(&self.meta_key(table, PENDING_SUFFIX))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Whether the table carries a pending marker.
    pub fn is_pending(&self, table: &str) -> Result<bool> {
        Ok(self
            .backend
            .get(&self.meta_key(table, PENDING_SUFFIX))?
            .is_some())
    }

    /// The pending entry for a table, with its current payload.
    pub fn pending_entry(&self, table: &str) -> Result<Option<PendingSyncEntry<T>>> {
        let Some(marker) = self.pending_marker(table)? else {
            return Ok(None);
        };
        Ok(Some(PendingSyncEntry {
            table: marker.table,
            owner_scope: marker.owner_scope,
            payload: self.read(table)?,
            enqueued_at: marker.enqueued_at,
        }))
    }

    /// Tables in this scope that carry a pending marker, sorted by name.
    pub fn pending_tables(&self) -> Result<Vec<TableName>> {
        let mut tables = Vec::new();
        for table in self.table_index()? {
            if self.is_pending(&table)? {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// Record a successful sync of data written at `written_at`.
    ///
    /// The pending marker is cleared only if nothing was written after
    /// `written_at`; a newer local edit keeps the table pending.
    pub fn mark_synced(&self, table: &str, written_at: Option<Timestamp>, now: Timestamp) -> Result<()> {
        self.register(table)?;
        self.backend
            .set(&self.meta_key(table, LAST_SYNCED_SUFFIX), &now.to_string())?;

        let newer_write = match (self.last_modified(table)?, written_at) {
            (Some(current), Some(sent)) => current > sent,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if newer_write {
            return Ok(());
        }
        self.backend.remove(&self.meta_key(table, PENDING_SUFFIX))
    }

    /// Remove every table key belonging to this owner scope, then the
    /// scope's table index.
    ///
    /// Returns the number of table keys removed.
    pub fn clear_scope(&self) -> Result<usize> {
        let present: BTreeSet<String> = self.backend.keys()?.into_iter().collect();
        let mut removed = 0;
        for table in self.table_index()? {
            let keys = [
                self.data_key(&table),
                self.meta_key(&table, LAST_MODIFIED_SUFFIX),
                self.meta_key(&table, LAST_SYNCED_SUFFIX),
                self.meta_key(&table, PENDING_SUFFIX),
            ];
            for key in keys.iter().filter(|key| present.contains(*key)) {
                self.backend.remove(key)?;
                removed += 1;
            }
        }
        self.backend.remove(&self.index_key())?;
        Ok(removed)
    }
}
