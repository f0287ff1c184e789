//! Tether Agent - offline-first sync sidecar.
//!
//! Keeps table data in a local file, syncs it to the configured remote when
//! the network allows, and serves state and events to a local UI.

use std::sync::Arc;

use axum::Router;
use tether_agent::{
    routes, AgentConfig, AppState, Connectivity, FileStore, HttpRemote, Scheduler, SyncOrchestrator,
    Transports,
};
use tether_engine::{LocalStore, Record};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AgentConfig::from_env()?;

    tracing::info!("Starting Tether Agent on {}:{}", config.host, config.port);

    // Local store
    let backend = Arc::new(FileStore::open(&config.data_path)?);
    let store: LocalStore<Record> = LocalStore::new(backend, config.owner_scope.clone())?;
    tracing::info!(
        path = %config.data_path.display(),
        owner_scope = %config.owner_scope,
        pending = store.pending_tables()?.len(),
        "Local store ready"
    );

    // Remotes
    let primary = Arc::new(HttpRemote::<Record>::new("primary", config.primary_url.clone()).with_fetch(config.fetch_remote));
    let mut transports = Transports::<Record>::new(primary.clone());
    if let Some(url) = &config.fallback_url {
        transports = transports.with_fallback(Arc::new(
            HttpRemote::<Record>::new("fallback", url.clone()).with_fetch(config.fetch_remote),
        ));
    }

    // Connectivity starts from a first probe, then is re-probed periodically
    let connectivity = Connectivity::new(primary.ping().await);
    let probe = {
        let connectivity = connectivity.clone();
        let interval = config.probe_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                connectivity.set_online(primary.ping().await);
            }
        })
    };

    // Engine
    let orchestrator = SyncOrchestrator::new(config.engine.clone(), store, transports, connectivity);
    let scheduler = Scheduler::new(orchestrator);
    scheduler.start();

    let state = AppState::new(scheduler.clone());

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Agent listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    probe.abort();
    scheduler.shutdown();

    Ok(())
}
