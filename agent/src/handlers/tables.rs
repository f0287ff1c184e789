//! Table handlers - local reads, local writes, and manual syncs.

use serde::Serialize;
use tether_engine::{Record, SyncState, SyncStats, TableName};

use crate::error::{AppError, Result};
use crate::orchestrator::SyncOrchestrator;
use crate::scheduler::Scheduler;

/// A table as the UI sees it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResponse {
    pub table: TableName,
    pub records: Vec<Record>,
    pub state: SyncState,
    pub stats: SyncStats,
}

/// Response to a local write.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub table: TableName,
    pub written: usize,
    pub state: SyncState,
}

/// Response to a manual sync.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub table: TableName,
    pub synced: bool,
    pub state: SyncState,
}

fn check_table(table: &str) -> Result<()> {
    if table.trim().is_empty() {
        return Err(AppError::BadRequest("empty table name".to_string()));
    }
    Ok(())
}

/// Read a table from the Local Store.
pub fn handle_get_table(orchestrator: &SyncOrchestrator<Record>, table: &str) -> Result<TableResponse> {
    check_table(table)?;
    Ok(TableResponse {
        table: table.to_string(),
        records: orchestrator.store().read(table)?,
        state: orchestrator.state(table),
        stats: orchestrator.stats(table),
    })
}

/// Persist a table locally and let the scheduler sync it after the
/// debounce window.
pub fn handle_put_table(scheduler: &Scheduler<Record>, table: &str, records: Vec<Record>) -> Result<WriteResponse> {
    check_table(table)?;
    if let Some(record) = records.iter().find(|r| r.id.trim().is_empty()) {
        return Err(AppError::BadRequest(format!(
            "record without id in {table}: {}",
            serde_json::Value::Object(record.fields.clone())
        )));
    }

    let written = records.len();
    scheduler.notify_change(table, records)?;
    tracing::debug!(table = %table, written, "Local write accepted");

    Ok(WriteResponse {
        table: table.to_string(),
        written,
        state: scheduler.orchestrator().state(table),
    })
}

/// Sync a table now, as a user action.
pub async fn handle_sync_table(orchestrator: &SyncOrchestrator<Record>, table: &str) -> Result<SyncResponse> {
    check_table(table)?;
    orchestrator.sync_table(table, tether_engine::Trigger::Manual).await?;
    Ok(SyncResponse {
        table: table.to_string(),
        synced: true,
        state: orchestrator.state(table),
    })
}
