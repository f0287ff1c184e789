//! Configuration for the sync runtime and the sidecar binary.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tether_engine::{MergeStrategy, RetryPolicy, ThrottlePolicy};

/// Tuning for the sync engine. Defaults match the documented behaviour.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backoff retry policy (3 retries, 2s base, 30s cap).
    pub retry: RetryPolicy,
    /// Minimum spacing between attempts on one table (10s).
    pub throttle: ThrottlePolicy,
    /// Lock time-to-live before a lock is treated as abandoned.
    pub lock_ttl: Duration,
    /// Per-task execution budget in the sync queue.
    pub task_timeout: Duration,
    /// Queued tasks older than this are rejected without running.
    pub max_task_age: Duration,
    /// Strategy for reconciling fetched remote snapshots.
    pub merge_strategy: MergeStrategy,
    /// Debounce applied to local mutations before an automatic sync.
    pub debounce: Duration,
    /// Wait after reconnecting before flushing pending tables.
    pub reconnect_settle: Duration,
    /// Pause between tables during a sweep.
    pub sweep_gap: Duration,
    /// Periodic global sweep interval; `None` disables it.
    pub sweep_interval: Option<Duration>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            throttle: ThrottlePolicy::default(),
            lock_ttl: Duration::from_secs(60),
            task_timeout: Duration::from_secs(30),
            max_task_age: Duration::from_secs(5 * 60),
            merge_strategy: MergeStrategy::NewestWins,
            debounce: Duration::from_millis(2000),
            reconnect_settle: Duration::from_secs(3),
            sweep_gap: Duration::from_secs(1),
            sweep_interval: Some(Duration::from_secs(10)),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the throttle window.
    pub fn with_throttle_window(mut self, window: Duration) -> Self {
        self.throttle = ThrottlePolicy::new(window);
        self
    }

    /// Sets the lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the per-task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Sets the maximum queued task age.
    pub fn with_max_task_age(mut self, age: Duration) -> Self {
        self.max_task_age = age;
        self
    }

    /// Sets the merge strategy.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Sets the mutation debounce.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the periodic sweep interval, or disables it with `None`.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Sidecar configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Listen address for the sidecar surface
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Tenant/user namespace for local data
    pub owner_scope: String,
    /// Primary remote endpoint
    pub primary_url: String,
    /// Alternate endpoint tried once on transport failure
    pub fallback_url: Option<String>,
    /// Fetch and merge the remote snapshot before each apply
    pub fetch_remote: bool,
    /// File backing the local key/value store
    pub data_path: PathBuf,
    /// How often connectivity is probed
    pub probe_interval: Duration,
    /// Engine tuning
    pub engine: EngineConfig,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("TETHER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("TETHER_PORT")
            .unwrap_or_else(|_| "4600".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidNumber("TETHER_PORT"))?;

        let owner_scope = env::var("TETHER_OWNER_SCOPE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingOwnerScope)?;

        let primary_url = env::var("TETHER_PRIMARY_URL").map_err(|_| ConfigError::MissingPrimaryUrl)?;
        let fallback_url = env::var("TETHER_FALLBACK_URL").ok().filter(|s| !s.is_empty());

        let fetch_remote = env::var("TETHER_FETCH_REMOTE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let data_path = env::var("TETHER_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tether-data.json"));

        let mut engine = EngineConfig::default();
        if let Ok(strategy) = env::var("TETHER_MERGE_STRATEGY") {
            engine.merge_strategy = strategy
                .parse()
                .map_err(|_| ConfigError::InvalidStrategy(strategy))?;
        }
        if let Some(ms) = millis_var("TETHER_DEBOUNCE_MS")? {
            engine.debounce = ms;
        }
        if let Some(ms) = millis_var("TETHER_SWEEP_INTERVAL_MS")? {
            engine.sweep_interval = (!ms.is_zero()).then_some(ms);
        }

        let probe_interval =
            millis_var("TETHER_PROBE_INTERVAL_MS")?.unwrap_or(Duration::from_secs(5));

        Ok(Self {
            host,
            port,
            owner_scope,
            primary_url,
            fallback_url,
            fetch_remote,
            data_path,
            probe_interval,
            engine,
        })
    }
}

fn millis_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidNumber(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TETHER_OWNER_SCOPE environment variable is required")]
    MissingOwnerScope,

    #[error("TETHER_PRIMARY_URL environment variable is required")]
    MissingPrimaryUrl,

    #[error("Invalid numeric value for {0}")]
    InvalidNumber(&'static str),

    #[error("Unknown merge strategy: {0}")]
    InvalidStrategy(String),
}
