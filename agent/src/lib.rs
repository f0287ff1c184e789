//! Tether Agent - offline-first sync runtime.
//!
//! Wires the pure `tether-engine` building blocks into a running system:
//! per-table locks, a global FIFO job queue, the sync orchestrator, and a
//! network-aware scheduler. The `tether-agent` binary exposes the runtime to
//! a local UI over HTTP and WebSocket.

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod file_store;
pub mod handlers;
pub mod http;
pub mod lock;
pub mod orchestrator;
pub mod queue;
pub mod remote;
pub mod routes;
pub mod scheduler;

use tether_engine::Record;

pub use clock::Clock;
pub use config::{AgentConfig, ConfigError, EngineConfig};
pub use connectivity::Connectivity;
pub use error::{AppError, SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use file_store::FileStore;
pub use http::HttpRemote;
pub use lock::{Lock, LockGuard, LockManager};
pub use orchestrator::SyncOrchestrator;
pub use queue::SyncQueue;
pub use remote::{Remote, RemoteError, Transports};
pub use scheduler::{Scheduler, SweepReport};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SyncOrchestrator<Record>,
    pub scheduler: Scheduler<Record>,
}

impl AppState {
    pub fn new(scheduler: Scheduler<Record>) -> Self {
        Self {
            orchestrator: scheduler.orchestrator().clone(),
            scheduler,
        }
    }
}
