//! Sync Monitor - bounded attempt history and derived health.
//!
//! Attempts move from an active map into a ring buffer when they finish.
//! Health is a sliding-window heuristic over recently finished attempts.

use crate::{TableName, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Number of finished attempts retained.
pub const HISTORY_CAPACITY: usize = 50;

/// Window over which failures count towards health, in milliseconds.
pub const HEALTH_WINDOW_MS: u64 = 15 * 60 * 1000;

const CRITICAL_FAILURES: usize = 5;
const WARNING_FAILURES: usize = 2;

/// One sync attempt, immutable once finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAttempt {
    pub id: String,
    pub table: TableName,
    pub operation: String,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Overall sync health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Good,
    Warning,
    Critical,
}

/// Success/failure totals over retained history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptTotals {
    pub success: usize,
    pub failure: usize,
}

/// Outcome of the most recent finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSync {
    pub time: Timestamp,
    pub success: bool,
}

/// Snapshot returned by [`SyncMonitor::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub active_count: usize,
    pub recent_attempts: Vec<SyncAttempt>,
    pub stats: AttemptTotals,
    pub health: Health,
    pub last_sync: Option<LastSync>,
}

/// Tracks active and finished sync attempts.
#[derive(Debug, Default)]
pub struct SyncMonitor {
    active: HashMap<String, SyncAttempt>,
    history: VecDeque<SyncAttempt>,
}

impl SyncMonitor {
    pub fn new() -> Self {
        Self {
            active: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Begin tracking an attempt.
    pub fn record_start(
        &mut self,
        attempt_id: impl Into<String>,
        table: impl Into<TableName>,
        operation: impl Into<String>,
        now: Timestamp,
    ) {
        let id = attempt_id.into();
        self.active.insert(
            id.clone(),
            SyncAttempt {
                id,
                table: table.into(),
                operation: operation.into(),
                start_time: now,
                end_time: None,
                success: false,
                error: None,
                duration_ms: None,
            },
        );
    }

    /// Finish an attempt successfully. Unknown ids are ignored.
    pub fn record_success(&mut self, attempt_id: &str, now: Timestamp) -> bool {
        self.finish(attempt_id, now, None)
    }

    /// Finish an attempt with an error. Unknown ids are ignored.
    pub fn record_failure(&mut self, attempt_id: &str, error: impl Into<String>, now: Timestamp) -> bool {
        self.finish(attempt_id, now, Some(error.into()))
    }

    fn finish(&mut self, attempt_id: &str, now: Timestamp, error: Option<String>) -> bool {
        let Some(mut attempt) = self.active.remove(attempt_id) else {
            return false;
        };
        attempt.end_time = Some(now);
        attempt.duration_ms = Some(now.saturating_sub(attempt.start_time));
        attempt.success = error.is_none();
        attempt.error = error;

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(attempt);
        true
    }

    /// Whether an attempt is still active.
    pub fn is_active(&self, attempt_id: &str) -> bool {
        self.active.contains_key(attempt_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Finished attempts, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &SyncAttempt> {
        self.history.iter()
    }

    /// Finished attempts for one table, oldest first.
    pub fn attempts_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a SyncAttempt> {
        self.history.iter().filter(move |a| a.table == table)
    }

    /// Health over attempts that ended within the last 15 minutes.
    pub fn health(&self, now: Timestamp) -> Health {
        let cutoff = now.saturating_sub(HEALTH_WINDOW_MS);
        let failures = self
            .history
            .iter()
            .filter(|a| !a.success && a.end_time.is_some_and(|end| end >= cutoff))
            .count();

        if failures >= CRITICAL_FAILURES {
            Health::Critical
        } else if failures >= WARNING_FAILURES {
            Health::Warning
        } else {
            Health::Good
        }
    }

    /// Full status snapshot.
    pub fn status(&self, now: Timestamp) -> MonitorStatus {
        let success = self.history.iter().filter(|a| a.success).count();
        let last_sync = self.history.back().and_then(|a| {
            a.end_time.map(|time| LastSync {
                time,
                success: a.success,
            })
        });

        MonitorStatus {
            active_count: self.active.len(),
            recent_attempts: self.history.iter().cloned().collect(),
            stats: AttemptTotals {
                success,
                failure: self.history.len() - success,
            },
            health: self.health(now),
            last_sync,
        }
    }
}
