mod auth;
mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use exec_signing_core::artifact::FsArtifactStorage;
use exec_signing_core::events::EventBus;
use exec_signing_core::notify::LogNotifier;
use exec_signing_core::store::{DocumentStore, MemoryDocumentStore, PgDocumentStore};
use exec_signing_core::SigningService;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience)
    let _ = dotenvy::dotenv();

    let config =
        AppConfig::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    tracing::info!("Starting executive signing API server");
    if config.uses_dev_jwt_secret() {
        tracing::warn!("JWT_SECRET not set; using the development secret");
    }

    match config.database_url.clone() {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .min_connections(config.db_min_connections)
                .connect(&database_url)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to database: {e}"))?;
            tracing::info!("Connected to PostgreSQL");

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
            tracing::info!("Database migrations applied");

            serve(Arc::new(PgDocumentStore::new(pool)), config).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; documents are kept in memory only");
            serve(Arc::new(MemoryDocumentStore::new()), config).await
        }
    }
}

async fn serve<S: DocumentStore>(store: Arc<S>, config: AppConfig) -> anyhow::Result<()> {
    let artifacts = FsArtifactStorage::new(&config.artifact_dir, config.artifact_base_url.clone());
    let signing = SigningService::new(
        store,
        Arc::new(artifacts),
        Arc::new(LogNotifier),
        config.signing_settings(),
    )
    .with_events(EventBus::new(config.event_bus_capacity));

    let sweeper = spawn_expiry_sweeper(
        signing.clone(),
        Duration::from_secs(config.expiry_sweep_interval_secs.max(1)),
    );

    let state = state::AppState::new(signing, config.clone());
    let app = routes::build_router(state)
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::body_limit::body_limit_layer())
        .layer(middleware::request_tracing::trace_layer())
        .layer(middleware::cors::cors_layer(&config.portal_base_url));

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Periodically expire documents whose signing token lapsed.
fn spawn_expiry_sweeper<S: DocumentStore>(
    signing: SigningService<S>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = signing.expire_overdue().await {
                tracing::error!(kind = %err.kind(), error = %err, "expiry sweep failed");
            }
        }
    })
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { tracing::info!("Received Ctrl+C, shutting down..."); }
        _ = terminate => { tracing::info!("Received SIGTERM, shutting down..."); }
    }
}
