use axum::{
    routing::{delete, get, post, put},
    Router,
};
use clap::Parser;
use esq_engine::store::SnapshotStore;
use esq_engine::{
    ConnectionConfig, ConnectionRegistry, EngineConfig, JsonFileStore, SearchSession,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "esq-hub", version, about = "ESQ query hub")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "esq-hub.toml")]
    config: PathBuf,

    /// Snapshot directory; overrides `server.data_dir`
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Connections registered at startup.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: default_snapshot_interval(),
            data_dir: None,
        }
    }
}

fn default_snapshot_interval() -> u64 {
    30
}

fn load_config(path: &PathBuf) -> Config {
    if !path.exists() {
        return Config::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Failed to read {:?}: {}; using defaults", path, e);
            return Config::default();
        }
    };
    toml::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!("Invalid config {:?}: {}; using defaults", path, e);
        Config::default()
    })
}

// =============================================================================
// Application State
// =============================================================================

pub struct AppState {
    pub session: SearchSession,
    pub store: Option<Arc<dyn SnapshotStore>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        engine: &EngineConfig,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        Self {
            session: SearchSession::new(registry, engine),
            store,
            start_time: Instant::now(),
        }
    }

    async fn persist(&self) {
        if let Some(store) = &self.store {
            self.session.persist(store.as_ref()).await;
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(api::status))
        // Connections
        .route(
            "/api/connections",
            get(api::list_connections).post(api::create_connection),
        )
        .route("/api/connections/:id", delete(api::delete_connection))
        .route(
            "/api/connections/:id/indices/:index/fields",
            get(api::index_fields),
        )
        // Compilation
        .route("/api/compile/query", post(api::compile_query))
        .route("/api/compile/aggregations", post(api::compile_aggregations))
        // Execution
        .route("/api/search", post(api::search))
        .route("/api/search/builder", post(api::search_builder))
        .route("/api/search/page", post(api::go_to_page))
        .route("/api/search/preload", post(api::preload_next_page))
        .route("/api/search/stream", post(api::stream))
        .route("/api/aggregate", post(api::aggregate))
        .route("/api/cache", get(api::cache_stats).delete(api::reset_cache))
        // Performance
        .route(
            "/api/performance",
            get(api::performance_history).delete(api::clear_performance),
        )
        .route("/api/performance/stats", get(api::performance_stats))
        .route("/api/performance/analyses", get(api::performance_analyses))
        .route("/api/performance/similar", post(api::similar_queries))
        // Slow query log
        .route(
            "/api/slow-queries",
            get(api::list_slow_queries).delete(api::clear_slow_queries),
        )
        .route("/api/slow-queries/stats", get(api::slow_query_stats))
        .route("/api/slow-queries/clusters", get(api::slow_query_clusters))
        .route("/api/slow-queries/by-index", get(api::slow_queries_by_index))
        .route(
            "/api/slow-queries/by-connection",
            get(api::slow_queries_by_connection),
        )
        .route("/api/slow-queries/hourly", get(api::slow_query_hourly))
        .route("/api/slow-queries/export", get(api::export_slow_queries))
        .route(
            "/api/slow-queries/threshold",
            get(api::slow_query_threshold).put(api::set_slow_query_threshold),
        )
        .route("/api/slow-queries/:id", delete(api::remove_slow_query))
        // History
        .route(
            "/api/history",
            get(api::list_history).delete(api::clear_history),
        )
        .route(
            "/api/history/favorites",
            get(api::list_favorites).post(api::add_favorite),
        )
        .route(
            "/api/history/favorites/:id",
            put(api::rename_favorite).delete(api::remove_favorite),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "esq_hub=info,esq_engine=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);

    let registry = Arc::new(ConnectionRegistry::new(&config.engine));
    for connection in config.connections.clone() {
        let id = connection.id.clone();
        if let Err(e) = registry.register(connection).await {
            tracing::error!("Failed to register connection {}: {}", id, e);
        }
    }

    let data_dir = args.data_dir.clone().or(config.server.data_dir.clone());
    let store: Option<Arc<dyn SnapshotStore>> = data_dir
        .as_ref()
        .map(|dir| Arc::new(JsonFileStore::new(dir)) as Arc<dyn SnapshotStore>);

    let state = Arc::new(AppState::new(registry, &config.engine, store));
    if let Some(store) = &state.store {
        state.session.restore(store.as_ref()).await;
    }

    // Spawn background snapshot flusher
    if state.store.is_some() {
        let bg_state = state.clone();
        let interval = Duration::from_secs(config.server.snapshot_interval_secs.max(1));
        tokio::spawn(async move { snapshot_flusher(bg_state, interval).await });
    }

    let app = router(state.clone());

    let addr: SocketAddr = args.bind.parse()?;
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  ESQ hub v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  API:          http://{}/api/status", addr);
    tracing::info!("  Connections:  {}", config.connections.len());
    tracing::info!("  Snapshots:    {:?}", data_dir);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.persist().await;
    tracing::info!("Shut down cleanly");
    Ok(())
}

// =============================================================================
// Background Snapshot Flusher
// =============================================================================

async fn snapshot_flusher(state: Arc<AppState>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately; state was just restored.
    interval.tick().await;
    loop {
        interval.tick().await;
        state.persist().await;
        tracing::debug!("Snapshots flushed");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
