//! Network-aware scheduling of automatic syncs.
//!
//! Three things drive automatic syncs:
//!
//! - local changes, debounced per table so a burst of edits syncs once
//! - the offline-to-online transition, after a settle delay
//! - an optional periodic sweep of pending tables
//!
//! Sweeps walk pending tables one at a time with a gap between them and
//! never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_engine::{SyncableRecord, TableName, Trigger};
use tokio::task::JoinHandle;

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::SyncOrchestrator;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tables that synced successfully
    pub synced: Vec<TableName>,
    /// Tables left pending, with the reason
    pub deferred: Vec<(TableName, SyncError)>,
    /// Whether the sweep was skipped because another was running
    pub skipped: bool,
}

impl SweepReport {
    /// Whether any table was left behind because connectivity dropped.
    pub fn interrupted_by_offline(&self) -> bool {
        self.deferred
            .iter()
            .any(|(_, err)| matches!(err, SyncError::Offline(_)))
    }
}

struct Inner<T: SyncableRecord> {
    orchestrator: SyncOrchestrator<T>,
    debounces: DashMap<TableName, JoinHandle<()>>,
    sweeping: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: SyncableRecord> Drop for Inner<T> {
    fn drop(&mut self) {
        for handle in self.debounces.iter() {
            handle.value().abort();
        }
        for handle in self.background.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Drives the orchestrator from local changes and connectivity.
pub struct Scheduler<T: SyncableRecord> {
    inner: Arc<Inner<T>>,
}

impl<T: SyncableRecord> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Scheduler<T>
where
    T: SyncableRecord + Serialize + DeserializeOwned,
{
    pub fn new(orchestrator: SyncOrchestrator<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                debounces: DashMap::new(),
                sweeping: AtomicBool::new(false),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<T> {
        &self.inner.orchestrator
    }

    /// Spawn the reconnect watcher, the periodic sweep, and an initial sweep
    /// of tables left pending by a previous run.
    pub fn start(&self) {
        let mut background = self.inner.background.lock();
        background.push(tokio::spawn(watch_reconnects(self.clone())));

        if let Some(interval) = self.inner.orchestrator.config().sweep_interval {
            background.push(tokio::spawn(periodic_sweep(self.clone(), interval)));
        }

        let initial = self.clone();
        background.push(tokio::spawn(async move {
            if initial.inner.orchestrator.connectivity().is_online() {
                let report = initial.sweep(Trigger::Initial).await;
                if !report.synced.is_empty() {
                    tracing::info!(tables = ?report.synced, "Initial sync complete");
                }
            }
        }));
        tracing::info!("Sync scheduler started");
    }

    /// Record a local change and schedule a debounced sync of the table.
    ///
    /// The write is durable before this returns; a later change to the same
    /// table within the debounce window replaces the scheduled sync.
    pub fn notify_change(&self, table: &str, data: Vec<T>) -> SyncResult<()> {
        let orchestrator = &self.inner.orchestrator;
        orchestrator.write_local(table, &data)?;

        let delay = orchestrator.config().debounce;
        let scheduler = self.clone();
        let table_name = table.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.inner.debounces.remove(&table_name);
            match scheduler
                .inner
                .orchestrator
                .sync_table(&table_name, Trigger::Auto)
                .await
            {
                Ok(()) => {}
                Err(err) if err.counts_as_failure() => {}
                Err(err) => tracing::debug!(table = %table_name, reason = %err, "Debounced sync deferred"),
            }
        });

        if let Some(previous) = self.inner.debounces.insert(table.to_string(), handle) {
            previous.abort();
            tracing::trace!(table = %table, "Debounce restarted");
        }
        Ok(())
    }

    /// Tables with a debounced sync waiting to fire.
    pub fn debounced(&self) -> Vec<TableName> {
        let mut tables: Vec<TableName> = self
            .inner
            .debounces
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .map(|entry| entry.key().clone())
            .collect();
        tables.sort();
        tables
    }

    /// Sync every pending table once, sequentially.
    pub async fn sweep_pending(&self) -> SweepReport {
        self.sweep(Trigger::Auto).await
    }

    async fn sweep(&self, trigger: Trigger) -> SweepReport {
        if self
            .inner
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sweep already running, skipped");
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        }

        let report = self.sweep_tables(trigger).await;
        self.inner.sweeping.store(false, Ordering::Release);
        report
    }

    async fn sweep_tables(&self, trigger: Trigger) -> SweepReport {
        let orchestrator = &self.inner.orchestrator;
        let mut report = SweepReport::default();

        let tables = match orchestrator.pending_tables() {
            Ok(tables) => tables,
            Err(err) => {
                tracing::error!(error = %err, "Failed to list pending tables");
                return report;
            }
        };
        if tables.is_empty() {
            return report;
        }
        tracing::debug!(count = tables.len(), trigger = %trigger, "Sweeping pending tables");

        let gap = orchestrator.config().sweep_gap;
        for (i, table) in tables.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(gap).await;
            }
            if !orchestrator.connectivity().is_online() {
                report.deferred.push((table, SyncError::Offline("sweep interrupted".to_string())));
                continue;
            }
            match orchestrator.sync_table(&table, trigger).await {
                Ok(()) => report.synced.push(table),
                Err(err) => report.deferred.push((table, err)),
            }
        }
        report
    }

    /// Stop background tasks, pending debounces, and scheduled retries.
    pub fn shutdown(&self) {
        for handle in self.inner.background.lock().drain(..) {
            handle.abort();
        }
        let tables: Vec<TableName> = self.inner.debounces.iter().map(|e| e.key().clone()).collect();
        for table in tables {
            if let Some((_, handle)) = self.inner.debounces.remove(&table) {
                handle.abort();
            }
        }
        self.inner.orchestrator.shutdown();
        tracing::info!("Sync scheduler stopped");
    }
}

async fn watch_reconnects<T>(scheduler: Scheduler<T>)
where
    T: SyncableRecord + Serialize + DeserializeOwned,
{
    let connectivity = scheduler.inner.orchestrator.connectivity().clone();
    let settle = scheduler.inner.orchestrator.config().reconnect_settle;
    let mut rx = connectivity.subscribe();
    let mut was_online = *rx.borrow_and_update();

    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if !online || was_online {
            was_online = online;
            continue;
        }

        tracing::info!(settle_ms = settle.as_millis() as u64, "Back online, sweeping pending tables");
        tokio::time::sleep(settle).await;
        if !connectivity.is_online() {
            was_online = false;
            continue;
        }

        let report = scheduler.sweep(Trigger::Auto).await;
        tracing::info!(
            synced = report.synced.len(),
            deferred = report.deferred.len(),
            "Reconnect sweep finished"
        );
        // A drop during the sweep left tables behind; the next transition
        // back online has to sweep again even if it was already observed.
        was_online = !report.interrupted_by_offline();
    }
}

async fn periodic_sweep<T>(scheduler: Scheduler<T>, interval: std::time::Duration)
where
    T: SyncableRecord + Serialize + DeserializeOwned,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !scheduler.inner.orchestrator.connectivity().is_online() {
            continue;
        }
        let report = scheduler.sweep(Trigger::Auto).await;
        if !report.synced.is_empty() {
            tracing::debug!(tables = ?report.synced, "Periodic sweep synced tables");
        }
    }
}
