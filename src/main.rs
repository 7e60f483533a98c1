use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use hotspot_rank::app_state::AppState;
use hotspot_rank::config::AppConfig;
use hotspot_rank::routes;
use hotspot_rank::services::{
    ebird::EbirdClient,
    fetch::Fetcher,
    queue::JobQueue,
    ranking::RankingService,
    session::SessionManager,
    species::SpeciesDirectory,
    taxonomy::Taxonomy,
    worker::{JobContext, WorkerPool},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(?config, "Initializing hotspot-rank server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // eBird client doubles as session backend and upstream source
    tracing::info!("Initializing eBird client");
    let ebird = Arc::new(
        EbirdClient::new(config.ebird_settings()).expect("Failed to initialize eBird client"),
    );
    let session = Arc::new(SessionManager::new(ebird.clone(), config.session_freshness()));
    let fetcher = Arc::new(Fetcher::new(ebird, config.fetch_settings()));

    let taxonomy = match &config.taxonomy_file {
        Some(path) => Taxonomy::load(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Taxonomy unavailable, species codes will be empty");
            Taxonomy::default()
        }),
        None => {
            tracing::info!("TAXONOMY_FILE not set, species codes will be empty");
            Taxonomy::default()
        }
    };
    let species = Arc::new(SpeciesDirectory::new(
        taxonomy,
        &config.ebird_base_url,
        fetcher.clone(),
    ));

    let ranking = Arc::new(RankingService::new(
        session.clone(),
        fetcher.clone(),
        species,
        config.cache_settings(),
    ));

    let queue = Arc::new(JobQueue::new());
    let pool = WorkerPool::start(
        JobContext {
            queue: queue.clone(),
            session: session.clone(),
            fetcher,
            ranking,
        },
        config.pool_settings(),
    );

    let state = AppState::new(queue, session, pool.worker_count());
    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting hotspot-rank on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    pool.shutdown().await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
