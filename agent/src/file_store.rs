//! JSON-file backed key/value store.
//!
//! The whole map is kept in memory and flushed on every mutation by writing
//! a sibling temp file and renaming it over the original.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tether_engine::{Error, KeyValueStore};

/// Durable [`KeyValueStore`] for the sidecar.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create on first write) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(Error::Storage(format!("{}: {e}", path.display()))),
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened file store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| Error::Storage(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tether_engine::{LocalStore, Record};

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::open(&path).unwrap();
        store.set("documents_user-1", "[]").unwrap();
        store.set("documents_user-1_last_modified", "1000").unwrap();
        store.remove("documents_user-1_last_modified").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("documents_user-1").unwrap().as_deref(), Some("[]"));
        assert_eq!(reopened.get("documents_user-1_last_modified").unwrap(), None);
        assert_eq!(reopened.keys().unwrap(), vec!["documents_user-1".to_string()]);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(FileStore::open(&path), Err(Error::Serialization(_))));
    }

    #[test]
    fn pending_sync_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        {
            let backend = Arc::new(FileStore::open(&path).unwrap());
            let local: LocalStore<Record> = LocalStore::new(backend, "user-1").unwrap();
            local.write("documents", &[Record::new("d1")], 1_000).unwrap();
            local.mark_pending("documents", 1_000).unwrap();
        }

        let backend = Arc::new(FileStore::open(&path).unwrap());
        let local: LocalStore<Record> = LocalStore::new(backend, "user-1").unwrap();
        assert_eq!(local.pending_tables().unwrap(), vec!["documents".to_string()]);
        assert_eq!(local.read("documents").unwrap().len(), 1);
    }
}
