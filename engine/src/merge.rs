//! Merge resolution between local and remote snapshots of a table.
//!
//! # Algorithm
//!
//! 1. Index both collections by record id
//! 2. Records present on only one side are kept unmodified
//! 3. Records present on both sides are resolved by the [`MergeStrategy`]
//! 4. Output lists remote-origin ids first (remote order), then local-only
//!    ids (local order). Callers must not rely on this ordering.
//!
//! If a side contains the same id more than once, its last occurrence is the
//! one considered.

use crate::{Error, SyncableRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Strategy for resolving records present on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Remote record always wins
    ServerWins,
    /// Local record always wins
    LocalWins,
    /// Later modification (then creation) time wins, ties favor remote
    #[default]
    NewestWins,
}

impl MergeStrategy {
    /// Wire name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::ServerWins => "server-wins",
            MergeStrategy::LocalWins => "local-wins",
            MergeStrategy::NewestWins => "newest-wins",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-wins" => Ok(MergeStrategy::ServerWins),
            "local-wins" => Ok(MergeStrategy::LocalWins),
            "newest-wins" => Ok(MergeStrategy::NewestWins),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}

/// Which side a merged record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSide {
    Local,
    Remote,
}

/// Decide which side wins for a record present on both sides.
pub fn resolve<T: SyncableRecord>(local: &T, remote: &T, strategy: MergeStrategy) -> MergeSide {
    match strategy {
        MergeStrategy::ServerWins => MergeSide::Remote,
        MergeStrategy::LocalWins => MergeSide::Local,
        MergeStrategy::NewestWins => {
            if local.effective_timestamp() > remote.effective_timestamp() {
                MergeSide::Local
            } else {
                MergeSide::Remote
            }
        }
    }
}

/// Merge local and remote snapshots of a table.
///
/// Pure and deterministic: inputs are never modified.
pub fn merge<T: SyncableRecord>(local: &[T], remote: &[T], strategy: MergeStrategy) -> Vec<T> {
    let local_by_id: HashMap<&str, &T> = local.iter().map(|r| (r.id(), r)).collect();
    let remote_by_id: HashMap<&str, &T> = remote.iter().map(|r| (r.id(), r)).collect();

    let mut emitted: HashSet<&str> = HashSet::with_capacity(local_by_id.len() + remote_by_id.len());
    let mut merged = Vec::with_capacity(local_by_id.len() + remote_by_id.len());

    for record in remote {
        let id = record.id();
        if !emitted.insert(id) {
            continue;
        }
        let remote_record = remote_by_id[id];
        let winner = match local_by_id.get(id) {
            Some(local_record) => match resolve(*local_record, remote_record, strategy) {
                MergeSide::Local => *local_record,
                MergeSide::Remote => remote_record,
            },
            None => remote_record,
        };
        merged.push(winner.clone());
    }

    for record in local {
        let id = record.id();
        if !emitted.insert(id) {
            continue;
        }
        merged.push(local_by_id[id].clone());
    }

    merged
}
