//! # Kanvas Server
//!
//! Local studio server for the Kanvas infinite canvas.
//! Binds to localhost only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use kanvas_core::ProjectStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kanvas_server::autosave::{save_projects, spawn_autosave_task, unsaved_projects};
use kanvas_server::metrics;
use kanvas_server::routes::{self, OWNER_HEADER};
use kanvas_server::{AppState, Config, GenerationProvider, ProviderClient, StorageClient};

/// Build a CORS layer that only allows localhost origins.
fn build_cors_layer(port: u16) -> CorsLayer {
    let localhost_origins = [
        format!("http://localhost:{port}"),
        format!("http://127.0.0.1:{port}"),
        // Common dev server ports
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(), // Vite
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ];

    let origins: Vec<HeaderValue> = localhost_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(OWNER_HEADER),
        ])
        .allow_credentials(true)
}

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels (default: info,kanvas_server=debug,tower_http=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kanvas_server=debug,tower_http=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

/// Open the project store, loading persisted projects when a data dir is set.
fn open_store(config: &Config) -> anyhow::Result<ProjectStore> {
    let Some(data_dir) = &config.data_dir else {
        tracing::warn!("No data directory configured; projects are kept in memory only");
        return Ok(ProjectStore::new());
    };
    let store = ProjectStore::with_data_dir(data_dir)?;
    let loaded = store.load_all()?;
    tracing::info!(
        data_dir = %data_dir.display(),
        projects = loaded.len(),
        "Loaded persisted projects"
    );
    Ok(store)
}

/// Periodically forget old finished generations.
fn spawn_prune_task(state: AppState, retention: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let pruned = state.orchestrator.prune_finished(retention);
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned finished generations");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::parse();

    let metrics_handle = metrics::init_metrics()
        .map_err(|e| anyhow::anyhow!("Failed to initialize Prometheus metrics: {}", e))?;
    tracing::info!("Prometheus metrics initialized");

    let store = open_store(&config)?;

    if config.provider_key.is_none() {
        tracing::warn!("KANVAS_PROVIDER_KEY not set; generation requests will be rejected upstream");
    }
    let provider: Arc<dyn GenerationProvider> = Arc::new(ProviderClient::new(
        &config.provider_url,
        config.provider_key.clone(),
    )?);
    let storage = config
        .storage_url
        .as_deref()
        .map(|url| StorageClient::new(url, config.retry()))
        .transpose()?;
    if storage.is_none() {
        tracing::info!("No storage backend configured; results keep provider URLs");
    }

    let state = AppState::new(
        store.clone(),
        provider,
        storage,
        config.autosave(),
        config.orchestrator(),
    );

    let _autosave = spawn_autosave_task(store.clone(), state.autosave.clone());
    spawn_prune_task(state.clone(), config.generation_retention());

    // Metrics endpoint has its own state
    let metrics_router = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    let app = routes::router(state.clone())
        .merge(metrics_router)
        // Request ID for distributed tracing correlation
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        // CORS configuration - restricted to localhost only
        .layer(build_cors_layer(config.port))
        // Structured request tracing with timing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    // Bind to localhost ONLY
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Kanvas server starting on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush anything the autosave loop has not written yet
    let pending = unsaved_projects(&store, &state.autosave);
    let saved = save_projects(&store, &state.autosave, &pending);
    tracing::info!(saved, "Kanvas server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Prometheus metrics endpoint.
#[tracing::instrument(name = "metrics", skip(handle))]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
