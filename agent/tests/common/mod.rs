//! Shared fixtures for agent integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tether_agent::{Clock, Connectivity, EngineConfig, Remote, RemoteError, SyncOrchestrator, Transports};
use tether_engine::{LocalStore, MemoryStore, Record};
use tokio::time::Instant;

pub const OWNER: &str = "user-1";
pub const EPOCH: u64 = 1_706_745_600_000;

/// One call received by a [`MockRemote`].
#[derive(Debug, Clone)]
pub struct Call {
    pub table: String,
    pub operation_id: String,
    pub records: Vec<Record>,
    pub at: Instant,
}

/// Scriptable in-memory remote.
pub struct MockRemote {
    name: &'static str,
    script: Mutex<VecDeque<Result<bool, RemoteError>>>,
    fallback_result: Mutex<Result<bool, RemoteError>>,
    snapshot: Mutex<Option<Vec<Record>>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl MockRemote {
    fn with_result(name: &'static str, result: Result<bool, RemoteError>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(VecDeque::new()),
            fallback_result: Mutex::new(result),
            snapshot: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Remote that accepts everything.
    pub fn accepting() -> Arc<Self> {
        Self::with_result("primary", Ok(true))
    }

    /// Remote that is unreachable.
    pub fn unreachable() -> Arc<Self> {
        Self::with_result("primary", Err(RemoteError::Transport("connection refused".into())))
    }

    pub fn named(name: &'static str, result: Result<bool, RemoteError>) -> Arc<Self> {
        Self::with_result(name, result)
    }

    /// Answer the next call with `result`, then go back to the default.
    pub fn push_result(&self, result: Result<bool, RemoteError>) {
        self.script.lock().push_back(result);
    }

    pub fn set_result(&self, result: Result<bool, RemoteError>) {
        *self.fallback_result.lock() = result;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_snapshot(&self, records: Vec<Record>) {
        *self.snapshot.lock() = Some(records);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Remote<Record> for MockRemote {
    async fn apply(&self, table: &str, records: &[Record], operation_id: &str) -> Result<bool, RemoteError> {
        self.calls.lock().push(Call {
            table: table.to_string(),
            operation_id: operation_id.to_string(),
            records: records.to_vec(),
            at: Instant::now(),
        });
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback_result.lock().clone())
    }

    async fn fetch(&self, _table: &str) -> Result<Option<Vec<Record>>, RemoteError> {
        Ok(self.snapshot.lock().clone())
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// An orchestrator over an in-memory store.
pub struct Harness {
    pub orchestrator: SyncOrchestrator<Record>,
    pub backend: Arc<MemoryStore>,
    pub remote: Arc<MockRemote>,
    pub connectivity: Connectivity,
}

pub fn harness(remote: Arc<MockRemote>, config: EngineConfig) -> Harness {
    let transports = Transports::<Record>::new(remote.clone());
    harness_with(remote, transports, config)
}

pub fn harness_with(remote: Arc<MockRemote>, transports: Transports<Record>, config: EngineConfig) -> Harness {
    let backend = MemoryStore::new_shared();
    let store = LocalStore::new(backend.clone(), OWNER).unwrap();
    let connectivity = Connectivity::new(true);
    let orchestrator = SyncOrchestrator::with_clock(
        config,
        Clock::starting_at(EPOCH),
        store,
        transports,
        connectivity.clone(),
    );
    Harness {
        orchestrator,
        backend,
        remote,
        connectivity,
    }
}

/// Engine config without the periodic sweep.
pub fn quiet_config() -> EngineConfig {
    EngineConfig::default().with_sweep_interval(None)
}

pub fn docs(titles: &[&str]) -> Vec<Record> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| Record::new(format!("doc-{i}")).with_field("title", json!(title)))
        .collect()
}

/// Milliseconds between two instants.
pub fn millis_between(from: Instant, to: Instant) -> u64 {
    to.duration_since(from).as_millis() as u64
}
