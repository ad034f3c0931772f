use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use geobridge::app_state::AppState;
use geobridge::config::AppConfig;
use geobridge::db;
use geobridge::routes;
use geobridge::services::worker;

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

    tracing::info!("Initializing geobridge server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "conversion_jobs_submitted",
        "Total conversion jobs submitted"
    );
    metrics::describe_counter!(
        "conversion_jobs_completed",
        "Total conversion jobs completed"
    );
    metrics::describe_counter!(
        "conversion_jobs_failed",
        "Total conversion jobs that failed"
    );
    metrics::describe_histogram!(
        "conversion_processing_seconds",
        "Time to process a conversion job"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Create shared application state
    let state = AppState::new(db_pool);

    // Spawn the single job worker. Shutdown is cooperative: the token stops
    // the loop from starting further waits or dequeues, and a job already
    // in flight finishes its terminal transition.
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker::run_worker(state.clone(), cancel.clone()));

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/ws", get(routes::ws::ws_handler))
        .route("/api/job/convert", post(routes::jobs::submit_job))
        .route("/api/job", get(routes::jobs::list_jobs))
        .route("/api/job/{id}", get(routes::jobs::get_job_status))
        .route("/api/job/{id}", delete(routes::jobs::delete_job))
        .route("/api/job/{id}/files", get(routes::jobs::get_job_files))
        .route("/api/job/{id}/kml", get(routes::jobs::download_kml))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting geobridge on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    cancel.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Worker task panicked during shutdown");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
