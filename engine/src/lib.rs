//! # Tether Engine
//!
//! Deterministic core of an offline-first synchronization engine.
//!
//! This crate holds the parts of sync that need no runtime: the record
//! capability trait, merge resolution, the local store layout, per-table
//! state and retry policy, and the attempt monitor. The async runtime that
//! drives them lives in `tether-agent`.
//!
//! ## Design Principles
//!
//! - **No IO**: persistence is a host-supplied [`KeyValueStore`]
//! - **Explicit time**: every time-dependent call takes `now` in epoch
//!   milliseconds, so the same inputs always produce the same outputs
//! - **Generic records**: anything implementing [`SyncableRecord`] syncs
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{merge, LocalStore, MemoryStore, MergeStrategy, Record};
//!
//! let backend = MemoryStore::new_shared();
//! let store = LocalStore::<Record>::new(backend, "user-42").unwrap();
//!
//! let local = vec![Record::new("doc-1").modified("2024-01-02T10:00:00Z".parse().unwrap())];
//! store.write("documents", &local, 1704189600000).unwrap();
//!
//! let remote = vec![Record::new("doc-1").modified("2024-01-02T09:00:00Z".parse().unwrap())];
//! let merged = merge(&store.read("documents").unwrap(), &remote, MergeStrategy::NewestWins);
//! assert_eq!(merged, local);
//! ```

pub mod error;
pub mod merge;
pub mod monitor;
pub mod record;
pub mod state;
pub mod store;

// Re-export main types at crate root
pub use error::Error;
pub use merge::{merge, resolve, MergeSide, MergeStrategy};
pub use monitor::{AttemptTotals, Health, LastSync, MonitorStatus, SyncAttempt, SyncMonitor};
pub use record::{Record, SyncableRecord};
pub use state::{RetryPolicy, SyncState, SyncStats, ThrottlePolicy, Trigger};
pub use store::{KeyValueStore, LocalStore, MemoryStore, PendingSyncEntry};

/// Type aliases for clarity
pub type RecordId = String;
pub type TableName = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
