//! Sync Orchestrator - the per-table state machine.
//!
//! States per table: `Idle -> Syncing -> {Success | Failed} -> Idle`, with a
//! failure optionally scheduling one backoff retry.
//!
//! A request runs these steps:
//!
//! 1. Empty data succeeds trivially, touching neither storage nor network
//! 2. Local write (write-before-send), so no edit is lost to a failed sync
//! 3. Reject if a sync for the table is in flight (not a failure)
//! 4. Reject if the previous attempt started inside the throttle window
//! 5. Defer if offline
//! 6. Lease the table lock; the lease is the single in-flight authority
//! 7. Enqueue the remote job on the global FIFO queue
//! 8. Record the outcome, schedule a retry if allowed, release the lease
//!
//! Rejected and deferred requests leave the table marked pending so a later
//! sweep picks it up.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_engine::{
    merge, LocalStore, MonitorStatus, SyncMonitor, SyncState, SyncStats, SyncableRecord,
    TableName, Timestamp, Trigger,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::lock::LockManager;
use crate::queue::SyncQueue;
use crate::remote::Transports;

struct Inner<T: SyncableRecord> {
    config: EngineConfig,
    clock: Clock,
    store: LocalStore<T>,
    locks: LockManager,
    queue: SyncQueue,
    transports: Transports<T>,
    connectivity: Connectivity,
    monitor: Mutex<SyncMonitor>,
    states: DashMap<TableName, SyncState>,
    stats: DashMap<TableName, SyncStats>,
    /// Operation id reused while retrying the same local write.
    operation_ids: DashMap<TableName, (Option<Timestamp>, String)>,
    retries: DashMap<TableName, JoinHandle<()>>,
    events: EventBus,
}

impl<T: SyncableRecord> Drop for Inner<T> {
    fn drop(&mut self) {
        for retry in self.retries.iter() {
            retry.value().abort();
        }
    }
}

/// Coordinates local persistence, locking, queueing, and remote apply.
///
/// Cheap to clone; clones share state.
pub struct SyncOrchestrator<T: SyncableRecord> {
    inner: Arc<Inner<T>>,
}

impl<T: SyncableRecord> Clone for SyncOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SyncOrchestrator<T>
where
    T: SyncableRecord + Serialize + DeserializeOwned,
{
    /// Create an orchestrator on the system clock. Must be called inside a
    /// tokio runtime (the queue worker is spawned here).
    pub fn new(
        config: EngineConfig,
        store: LocalStore<T>,
        transports: Transports<T>,
        connectivity: Connectivity,
    ) -> Self {
        Self::with_clock(config, Clock::system(), store, transports, connectivity)
    }

    /// Create an orchestrator on an explicit clock.
    pub fn with_clock(
        config: EngineConfig,
        clock: Clock,
        store: LocalStore<T>,
        transports: Transports<T>,
        connectivity: Connectivity,
    ) -> Self {
        let queue = SyncQueue::start(config.task_timeout, config.max_task_age);
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                locks: LockManager::new(clock),
                monitor: Mutex::new(SyncMonitor::new()),
                states: DashMap::new(),
                stats: DashMap::new(),
                operation_ids: DashMap::new(),
                retries: DashMap::new(),
                config,
                clock,
                store,
                queue,
                transports,
                connectivity,
                events,
            }),
        }
    }

    /// Persist `data` locally, then try to sync it.
    pub async fn request_sync(&self, table: &str, data: Vec<T>, trigger: Trigger) -> SyncResult<()> {
        validate_table(table)?;
        if data.is_empty() {
            tracing::debug!(table = %table, "Nothing to sync");
            return Ok(());
        }

        let written_at = self.write_local(table, &data)?;
        self.dispatch(table, data, trigger, Some(written_at)).await
    }

    /// Sync whatever the Local Store currently holds for `table`.
    pub async fn sync_table(&self, table: &str, trigger: Trigger) -> SyncResult<()> {
        validate_table(table)?;
        let data = self.inner.store.read(table)?;
        if data.is_empty() {
            tracing::debug!(table = %table, "Nothing to sync");
            return Ok(());
        }
        let written_at = self.inner.store.last_modified(table)?;
        self.dispatch(table, data, trigger, written_at).await
    }

    /// Write a table locally and mark it diverged. Returns the write time.
    pub fn write_local(&self, table: &str, data: &[T]) -> SyncResult<Timestamp> {
        validate_table(table)?;
        let inner = &self.inner;
        let now = inner.clock.now();
        inner.store.write(table, data, now)?;
        inner.store.mark_pending(table, now)?;
        self.update_state(table, |state| {
            state.data_changed = true;
            state.pending_sync = true;
        });
        Ok(now)
    }

    async fn dispatch(
        &self,
        table: &str,
        data: Vec<T>,
        trigger: Trigger,
        written_at: Option<Timestamp>,
    ) -> SyncResult<()> {
        let inner = &self.inner;
        let now = inner.clock.now();

        if inner.locks.is_locked(table) {
            tracing::debug!(table = %table, trigger = %trigger, "Sync already in progress");
            self.defer(table, now)?;
            return Err(SyncError::InProgress(table.to_string()));
        }

        if trigger != Trigger::Retry && inner.config.throttle.should_throttle(&self.stats(table), now) {
            tracing::debug!(table = %table, trigger = %trigger, "Sync throttled");
            self.defer(table, now)?;
            return Err(SyncError::Throttled(table.to_string()));
        }

        if !inner.connectivity.is_online() {
            tracing::debug!(table = %table, "Offline, sync deferred");
            self.defer(table, now)?;
            return Err(SyncError::Offline(table.to_string()));
        }

        let Some(lease) = inner.locks.lease(table, inner.config.lock_ttl) else {
            self.defer(table, now)?;
            return Err(SyncError::InProgress(table.to_string()));
        };

        self.defer(table, now)?;
        inner.stats.entry(table.to_string()).or_default().record_attempt(now);
        self.update_state(table, |state| state.is_syncing = true);

        let attempt_id = uuid::Uuid::new_v4().to_string();
        let operation_id = self.operation_id_for(table, written_at);

        let job = {
            let inner = Arc::clone(&self.inner);
            let table = table.to_string();
            let attempt_id = attempt_id.clone();
            move || async move {
                inner
                    .execute(&table, data, &attempt_id, &operation_id, trigger, written_at)
                    .await
            }
        };
        let handle = inner.queue.enqueue(table, job);

        // Bookkeeping runs to completion even if the caller stops waiting.
        let this = self.clone();
        let table = table.to_string();
        let settle = tokio::spawn(async move {
            let outcome = handle.await;
            this.finish(&table, &attempt_id, trigger, written_at, &outcome);
            drop(lease);
            outcome
        });

        settle.await.unwrap_or(Err(SyncError::Cancelled))
    }

    fn defer(&self, table: &str, now: Timestamp) -> SyncResult<()> {
        self.inner.store.mark_pending(table, now)?;
        self.update_state(table, |state| state.pending_sync = true);
        Ok(())
    }

    fn operation_id_for(&self, table: &str, written_at: Option<Timestamp>) -> String {
        let mut entry = self
            .inner
            .operation_ids
            .entry(table.to_string())
            .or_insert_with(|| (written_at, uuid::Uuid::new_v4().to_string()));
        if entry.0 != written_at {
            *entry = (written_at, uuid::Uuid::new_v4().to_string());
        }
        entry.1.clone()
    }

    fn finish(
        &self,
        table: &str,
        attempt_id: &str,
        trigger: Trigger,
        written_at: Option<Timestamp>,
        outcome: &SyncResult<()>,
    ) {
        let inner = &self.inner;
        let now = inner.clock.now();

        match outcome {
            Ok(()) => {
                inner.monitor.lock().record_success(attempt_id, now);
                inner.stats.entry(table.to_string()).or_default().record_success();
                inner.operation_ids.remove(table);
                if let Err(err) = inner.store.mark_synced(table, written_at, now) {
                    tracing::warn!(table = %table, error = %err, "Failed to persist sync marker");
                }
                let still_pending = inner.store.is_pending(table).unwrap_or(true);
                self.update_state(table, |state| {
                    state.is_syncing = false;
                    state.sync_failed = false;
                    state.last_synced = Some(now);
                    state.pending_sync = still_pending;
                    state.data_changed = still_pending;
                });
                self.cancel_retry(table);

                inner.events.emit(SyncEvent::SyncCompleted {
                    attempt_id: attempt_id.to_string(),
                    table: table.to_string(),
                    operation: trigger.to_string(),
                });
                tracing::info!(table = %table, attempt_id = %attempt_id, trigger = %trigger, "Sync completed");
            }
            Err(err) if err.counts_as_failure() => {
                inner.monitor.lock().record_failure(attempt_id, err.to_string(), now);
                let consecutive = {
                    let mut stats = inner.stats.entry(table.to_string()).or_default();
                    stats.record_failure();
                    stats.consecutive_failures
                };
                self.update_state(table, |state| {
                    state.is_syncing = false;
                    state.sync_failed = true;
                    state.pending_sync = true;
                });

                inner.events.emit(SyncEvent::SyncFailed {
                    attempt_id: attempt_id.to_string(),
                    table: table.to_string(),
                    error: err.to_string(),
                });
                tracing::warn!(
                    table = %table,
                    attempt_id = %attempt_id,
                    trigger = %trigger,
                    consecutive_failures = consecutive,
                    error = %err,
                    "Sync failed"
                );

                let retry = inner.config.retry;
                if !trigger.retries_on_failure() {
                    self.notify(table, format!("Sync of {table} failed: {err}"));
                } else if let Some(delay) = retry.next_retry(consecutive) {
                    if err.is_retryable() && inner.connectivity.is_online() {
                        self.schedule_retry(table, consecutive, delay);
                    }
                } else if retry.is_exhausted_by(consecutive) {
                    self.notify(
                        table,
                        format!("Sync of {table} failed after {} retries: {err}", retry.max_retries),
                    );
                }
            }
            Err(err) => {
                // Never reached the remote, or was cut off before finishing
                let started = inner.monitor.lock().record_failure(attempt_id, err.to_string(), now);
                self.update_state(table, |state| state.is_syncing = false);
                if started {
                    inner.events.emit(SyncEvent::SyncFailed {
                        attempt_id: attempt_id.to_string(),
                        table: table.to_string(),
                        error: err.to_string(),
                    });
                }
                match err {
                    SyncError::Expired => {
                        tracing::warn!(table = %table, attempt_id = %attempt_id, "Sync expired in queue")
                    }
                    _ => tracing::debug!(table = %table, attempt_id = %attempt_id, error = %err, "Sync not run"),
                }
            }
        }
    }

    fn notify(&self, table: &str, message: String) {
        self.inner.events.emit(SyncEvent::Notice {
            table: table.to_string(),
            message,
        });
    }

    fn schedule_retry(&self, table: &str, attempt: u32, delay: Duration) {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let table_name = table.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.retries.remove(&table_name);
            let orchestrator = SyncOrchestrator { inner };
            if let Err(err) = orchestrator.sync_table(&table_name, Trigger::Retry).await {
                tracing::debug!(table = %table_name, error = %err, "Retry did not succeed");
            }
        });

        if let Some(previous) = self.inner.retries.insert(table.to_string(), handle) {
            previous.abort();
        }

        self.inner.events.emit(SyncEvent::RetryScheduled {
            table: table.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        tracing::info!(table = %table, attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
    }

    /// Cancel a scheduled retry. Returns whether one was pending.
    pub fn cancel_retry(&self, table: &str) -> bool {
        match self.inner.retries.remove(table) {
            Some((_, handle)) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Tables with a retry waiting to fire, sorted by name.
    pub fn scheduled_retries(&self) -> Vec<TableName> {
        let mut tables: Vec<TableName> = self
            .inner
            .retries
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .map(|entry| entry.key().clone())
            .collect();
        tables.sort();
        tables
    }

    fn update_state(&self, table: &str, update: impl FnOnce(&mut SyncState)) {
        let mut state = self
            .inner
            .states
            .entry(table.to_string())
            .or_insert_with(|| self.derive_state(table));
        update(&mut state);
    }

    fn derive_state(&self, table: &str) -> SyncState {
        let pending = self.inner.store.is_pending(table).unwrap_or(false);
        SyncState {
            is_syncing: false,
            last_synced: self.inner.store.last_synced(table).unwrap_or(None),
            sync_failed: false,
            pending_sync: pending,
            data_changed: pending,
        }
    }

    /// Current state of a table. Unknown tables are derived from the Local
    /// Store.
    pub fn state(&self, table: &str) -> SyncState {
        match self.inner.states.get(table) {
            Some(state) => *state,
            None => self.derive_state(table),
        }
    }

    /// Attempt statistics of a table.
    pub fn stats(&self, table: &str) -> SyncStats {
        self.inner
            .stats
            .get(table)
            .map(|stats| *stats)
            .unwrap_or_default()
    }

    /// Monitor status snapshot.
    pub fn status(&self) -> MonitorStatus {
        self.inner.monitor.lock().status(self.inner.clock.now())
    }

    /// Tables whose local data awaits sync.
    pub fn pending_tables(&self) -> SyncResult<Vec<TableName>> {
        Ok(self.inner.store.pending_tables()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &LocalStore<T> {
        &self.inner.store
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> Clock {
        self.inner.clock
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Cancel every scheduled retry.
    pub fn shutdown(&self) {
        let tables: Vec<TableName> = self.inner.retries.iter().map(|e| e.key().clone()).collect();
        for table in tables {
            self.cancel_retry(&table);
        }
    }
}

impl<T> Inner<T>
where
    T: SyncableRecord + Serialize + DeserializeOwned,
{
    async fn execute(
        &self,
        table: &str,
        data: Vec<T>,
        attempt_id: &str,
        operation_id: &str,
        trigger: Trigger,
        written_at: Option<Timestamp>,
    ) -> SyncResult<()> {
        let started = self.clock.now();
        self.monitor
            .lock()
            .record_start(attempt_id, table, trigger.as_str(), started);
        self.events.emit(SyncEvent::SyncStarted {
            attempt_id: attempt_id.to_string(),
            table: table.to_string(),
            operation: trigger.to_string(),
        });
        tracing::debug!(table = %table, attempt_id = %attempt_id, records = data.len(), "Sync started");

        let records = match self.transports.fetch(table).await? {
            Some(remote) => {
                let merged = merge(&data, &remote, self.config.merge_strategy);
                // Only replace local data nobody has touched since it was read
                if self.store.last_modified(table)? == written_at {
                    self.store.write(table, &merged, written_at.unwrap_or(started))?;
                }
                tracing::debug!(
                    table = %table,
                    local = data.len(),
                    remote = remote.len(),
                    merged = merged.len(),
                    strategy = %self.config.merge_strategy,
                    "Merged remote snapshot"
                );
                merged
            }
            None => data,
        };

        match self.transports.apply(table, &records, operation_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(SyncError::Rejected(table.to_string())),
            Err(err) => Err(err.into()),
        }
    }
}

fn validate_table(table: &str) -> SyncResult<()> {
    if table.trim().is_empty() {
        return Err(SyncError::Validation("table name is required".to_string()));
    }
    Ok(())
}
