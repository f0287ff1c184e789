//! Integration tests for the sync orchestrator.
//!
//! Every test runs on a paused tokio clock, so backoff and throttle windows
//! elapse instantly and deterministically.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use common::*;
use serde_json::json;
use tether_agent::{EngineConfig, RemoteError, SyncError, SyncEvent, Transports};
use tether_engine::{MergeStrategy, Record, Trigger};

#[tokio::test(start_paused = true)]
async fn offline_save_is_kept_locally_and_deferred() {
    let h = harness(MockRemote::accepting(), quiet_config());
    h.connectivity.set_online(false);

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Draft"]), Trigger::Manual)
        .await;

    assert_eq!(result, Err(SyncError::Offline("documents".into())));
    assert_eq!(h.orchestrator.store().read("documents").unwrap(), docs(&["Draft"]));
    assert!(h.orchestrator.state("documents").pending_sync);
    assert_eq!(h.orchestrator.pending_tables().unwrap(), vec!["documents".to_string()]);
    assert_eq!(h.remote.call_count(), 0);
    assert!(h.orchestrator.status().recent_attempts.is_empty());
    assert_eq!(h.orchestrator.stats("documents").attempt_count, 0);
}

#[tokio::test(start_paused = true)]
async fn empty_data_is_a_no_op() {
    let h = harness(MockRemote::accepting(), quiet_config());

    assert_eq!(h.orchestrator.request_sync("documents", vec![], Trigger::Manual).await, Ok(()));
    assert_eq!(h.remote.call_count(), 0);
    assert!(h.backend.is_empty());
}

#[tokio::test(start_paused = true)]
async fn blank_table_name_is_rejected() {
    let h = harness(MockRemote::accepting(), quiet_config());
    let result = h.orchestrator.request_sync("  ", docs(&["Draft"]), Trigger::Manual).await;
    assert!(matches!(result, Err(SyncError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn successful_sync_clears_pending() {
    let h = harness(MockRemote::accepting(), quiet_config());

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Report"]), Trigger::Manual)
        .await;
    assert_eq!(result, Ok(()));

    let state = h.orchestrator.state("documents");
    assert!(!state.pending_sync);
    assert!(!state.is_syncing);
    assert!(!state.sync_failed);
    assert!(state.last_synced.is_some_and(|at| at >= EPOCH));
    assert!(h.orchestrator.pending_tables().unwrap().is_empty());

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].table, "documents");
    assert_eq!(calls[0].records, docs(&["Report"]));

    let status = h.orchestrator.status();
    assert_eq!(status.stats.success, 1);
    assert_eq!(status.active_count, 0);
    assert_eq!(status.recent_attempts[0].operation, "manual");
}

#[tokio::test(start_paused = true)]
async fn failed_sync_keeps_local_write() {
    let h = harness(MockRemote::unreachable(), quiet_config());

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Unsent"]), Trigger::Manual)
        .await;

    assert!(matches!(result, Err(SyncError::Transport(_))));
    assert_eq!(h.orchestrator.store().read("documents").unwrap(), docs(&["Unsent"]));

    let state = h.orchestrator.state("documents");
    assert!(state.sync_failed);
    assert!(state.pending_sync);
    assert!(!state.is_syncing);

    let stats = h.orchestrator.stats("documents");
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.consecutive_failures, 1);
    assert!(h.orchestrator.locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn manual_failure_notifies_without_retry() {
    let h = harness(MockRemote::unreachable(), quiet_config());
    let mut events = h.orchestrator.subscribe();

    let _ = h
        .orchestrator
        .request_sync("documents", docs(&["Unsent"]), Trigger::Manual)
        .await;

    assert!(h.orchestrator.scheduled_retries().is_empty());

    let mut saw_notice = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SyncEvent::RetryScheduled { .. }));
        if let SyncEvent::Notice { table, .. } = event {
            assert_eq!(table, "documents");
            saw_notice = true;
        }
    }
    assert!(saw_notice);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.remote.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn only_one_sync_per_table_in_flight() {
    let h = harness(MockRemote::accepting(), quiet_config());
    h.remote.set_delay(Duration::from_millis(500));

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .request_sync("documents", docs(&["v1"]), Trigger::Manual)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.orchestrator.state("documents").is_syncing);

    let second = h
        .orchestrator
        .request_sync("documents", docs(&["v2"]), Trigger::Auto)
        .await;
    assert_eq!(second, Err(SyncError::InProgress("documents".into())));
    // The rejected edit is still stored
    assert_eq!(h.orchestrator.store().read("documents").unwrap(), docs(&["v2"]));

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(h.orchestrator.stats("documents").attempt_count, 1);

    // The newer edit was never sent, so the table stays pending
    assert!(h.orchestrator.state("documents").pending_sync);
    assert_eq!(h.orchestrator.pending_tables().unwrap(), vec!["documents".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn other_tables_are_not_blocked() {
    let h = harness(MockRemote::accepting(), quiet_config());
    h.remote.set_delay(Duration::from_millis(500));

    let documents = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .request_sync("documents", docs(&["doc"]), Trigger::Manual)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Queued behind documents, but accepted rather than rejected
    let invoices = h
        .orchestrator
        .request_sync("invoices", docs(&["invoice"]), Trigger::Manual)
        .await;

    assert_eq!(invoices, Ok(()));
    assert_eq!(documents.await.unwrap(), Ok(()));

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].table, "documents");
    assert_eq!(calls[1].table, "invoices");
    assert!(millis_between(calls[0].at, calls[1].at) >= 500);
}

#[tokio::test(start_paused = true)]
async fn requests_inside_window_are_throttled() {
    let h = harness(MockRemote::accepting(), quiet_config());

    let first = h
        .orchestrator
        .request_sync("documents", docs(&["v1"]), Trigger::Manual)
        .await;
    assert_eq!(first, Ok(()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = h
        .orchestrator
        .request_sync("documents", docs(&["v2"]), Trigger::Manual)
        .await;
    assert_eq!(second, Err(SyncError::Throttled("documents".into())));
    assert_eq!(h.remote.call_count(), 1);
    assert!(h.orchestrator.state("documents").pending_sync);
    // A throttled request is not a failure
    assert_eq!(h.orchestrator.stats("documents").failure_count, 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let third = h.orchestrator.sync_table("documents", Trigger::Manual).await;
    assert_eq!(third, Ok(()));

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].records, docs(&["v2"]));
    assert!(!h.orchestrator.state("documents").pending_sync);
}

#[tokio::test(start_paused = true)]
async fn automatic_failures_back_off_exponentially() {
    let h = harness(MockRemote::unreachable(), quiet_config());
    let mut events = h.orchestrator.subscribe();

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Unsent"]), Trigger::Auto)
        .await;
    assert!(matches!(result, Err(SyncError::Transport(_))));
    assert_eq!(h.orchestrator.scheduled_retries(), vec!["documents".to_string()]);

    tokio::time::sleep(Duration::from_secs(120)).await;

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 4, "one attempt plus three retries");

    let gaps: Vec<u64> = calls
        .windows(2)
        .map(|pair| millis_between(pair[0].at, pair[1].at))
        .collect();
    for (gap, expected) in gaps.iter().zip([2_000u64, 4_000, 8_000]) {
        assert!(
            (expected..expected + 50).contains(gap),
            "gap {gap}ms, expected about {expected}ms"
        );
    }

    // Retries share the operation id of the unchanged write
    assert!(calls.iter().all(|c| c.operation_id == calls[0].operation_id));

    let stats = h.orchestrator.stats("documents");
    assert_eq!(stats.consecutive_failures, 4);
    assert!(h.orchestrator.scheduled_retries().is_empty());
    assert!(h.orchestrator.state("documents").pending_sync);

    let mut delays = Vec::new();
    let mut gave_up = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::RetryScheduled { delay_ms, .. } => delays.push(delay_ms),
            SyncEvent::Notice { message, .. } => gave_up = message.contains("after 3 retries"),
            _ => {}
        }
    }
    assert_eq!(delays, vec![2_000, 4_000, 8_000]);
    assert!(gave_up);
}

#[tokio::test(start_paused = true)]
async fn retry_succeeds_after_transient_failure() {
    let h = harness(MockRemote::accepting(), quiet_config());
    h.remote.push_result(Err(RemoteError::Transport("reset by peer".into())));

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Report"]), Trigger::Auto)
        .await;
    assert!(result.is_err());
    assert!(h.orchestrator.state("documents").sync_failed);

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.remote.call_count(), 2);
    let state = h.orchestrator.state("documents");
    assert!(!state.sync_failed);
    assert!(!state.pending_sync);
    assert_eq!(h.orchestrator.stats("documents").consecutive_failures, 0);

    let status = h.orchestrator.status();
    assert_eq!(status.stats.failure, 1);
    assert_eq!(status.stats.success, 1);
    assert_eq!(status.recent_attempts.last().unwrap().operation, "retry");
}

#[tokio::test(start_paused = true)]
async fn scheduled_retry_can_be_cancelled() {
    let h = harness(MockRemote::unreachable(), quiet_config());

    let _ = h
        .orchestrator
        .request_sync("documents", docs(&["Unsent"]), Trigger::Auto)
        .await;

    assert!(h.orchestrator.cancel_retry("documents"));
    assert!(!h.orchestrator.cancel_retry("documents"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.remote.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_retry_scheduled_while_offline() {
    let h = harness(MockRemote::unreachable(), quiet_config());
    h.remote.set_delay(Duration::from_millis(100));

    let sync = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .request_sync("documents", docs(&["Unsent"]), Trigger::Auto)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.connectivity.set_online(false);

    assert!(sync.await.unwrap().is_err());
    assert!(h.orchestrator.scheduled_retries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_refusal_counts_as_failure() {
    let h = harness(MockRemote::named("primary", Ok(false)), quiet_config());

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Report"]), Trigger::Manual)
        .await;

    assert_eq!(result, Err(SyncError::Rejected("documents".into())));
    assert_eq!(h.orchestrator.stats("documents").failure_count, 1);
    assert!(h.orchestrator.state("documents").sync_failed);
}

#[tokio::test(start_paused = true)]
async fn fallback_transport_recovers_primary_failure() {
    let primary = MockRemote::unreachable();
    let fallback = MockRemote::named("fallback", Ok(true));
    let transports = Transports::<Record>::new(primary.clone()).with_fallback(fallback.clone());
    let h = harness_with(primary, transports, quiet_config());

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Report"]), Trigger::Manual)
        .await;

    assert_eq!(result, Ok(()));
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(fallback.call_count(), 1);
    assert_eq!(fallback.calls()[0].operation_id, h.remote.calls()[0].operation_id);
    assert!(!h.orchestrator.state("documents").pending_sync);
}

#[tokio::test(start_paused = true)]
async fn hung_remote_times_out_as_failure() {
    let config = quiet_config().with_task_timeout(Duration::from_secs(30));
    let h = harness(MockRemote::accepting(), config);
    h.remote.set_delay(Duration::from_secs(31));

    let result = h
        .orchestrator
        .request_sync("documents", docs(&["Report"]), Trigger::Manual)
        .await;

    assert_eq!(result, Err(SyncError::Timeout));
    assert_eq!(h.orchestrator.stats("documents").failure_count, 1);

    let status = h.orchestrator.status();
    assert_eq!(status.active_count, 0);
    assert_eq!(status.stats.failure, 1);
    assert!(!status.recent_attempts[0].success);
    assert!(h.orchestrator.locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn newer_local_edit_wins_merge() {
    let config = quiet_config().with_merge_strategy(MergeStrategy::NewestWins);
    let h = harness(MockRemote::accepting(), config);

    let at = |hour: u32| Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap();
    h.remote.set_snapshot(vec![
        Record::new("doc-1").modified(at(10)).with_field("title", json!("server")),
        Record::new("doc-2").modified(at(9)).with_field("title", json!("server only")),
    ]);

    let local = vec![Record::new("doc-1").modified(at(12)).with_field("title", json!("local"))];
    let result = h.orchestrator.request_sync("documents", local, Trigger::Manual).await;
    assert_eq!(result, Ok(()));

    let sent = &h.remote.calls()[0].records;
    assert_eq!(sent.len(), 2);
    let doc1 = sent.iter().find(|r| r.id == "doc-1").unwrap();
    assert_eq!(doc1.field("title"), Some(&json!("local")));

    // The merged result replaces the local copy
    let stored = h.orchestrator.store().read("documents").unwrap();
    assert_eq!(stored.len(), 2);
    assert!(!h.orchestrator.state("documents").pending_sync);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_events_are_emitted_in_order() {
    let h = harness(MockRemote::accepting(), quiet_config());
    let mut events = h.orchestrator.subscribe();

    h.orchestrator
        .request_sync("documents", docs(&["Report"]), Trigger::Manual)
        .await
        .unwrap();

    let started = events.recv().await.unwrap();
    let completed = events.recv().await.unwrap();
    match (started, completed) {
        (
            SyncEvent::SyncStarted { attempt_id: a, operation, .. },
            SyncEvent::SyncCompleted { attempt_id: b, .. },
        ) => {
            assert_eq!(a, b);
            assert_eq!(operation, "manual");
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn state_is_derived_from_store_for_unknown_tables() {
    let h = harness(MockRemote::accepting(), EngineConfig::default());
    h.orchestrator.write_local("documents", &docs(&["Draft"])).unwrap();

    let fresh = harness(MockRemote::accepting(), EngineConfig::default());
    assert!(!fresh.orchestrator.state("documents").pending_sync);
    assert!(h.orchestrator.state("documents").pending_sync);
    assert!(h.orchestrator.state("documents").data_changed);
}
