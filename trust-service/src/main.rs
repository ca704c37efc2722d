use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::Instrument;
use trust_service::{
    build_router, config::TrustConfig, migrations::run_migrations, store::MongoStore, AppState,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration (including .env) - fail fast if invalid
    let config = TrustConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting trust service"
    );

    let store = MongoStore::connect(&config.mongodb.uri, &config.mongodb.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    let store = Arc::new(store);

    let report = run_migrations(store.as_ref(), &config.jwt.self_app_id, &config.migrations).await?;
    tracing::info!(
        applied = ?report.applied,
        awaited = ?report.awaited,
        "Migrations finished"
    );

    let port = config.common.port;
    let state = AppState::new(config, store)?;

    if state.keys.has_trusted_issuers() && state.keys.should_refresh() {
        let keys = state.keys.clone();
        tokio::spawn(async move { keys.refresh_trusted_keys().await });
    }

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let service_span = tracing::info_span!(
        "service",
        service = %state.config.service_name,
        version = %state.config.service_version,
    );

    async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(address = %addr, kid = %state.keys.active_kid(), "Listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Service shutdown complete");
        Ok::<(), AppError>(())
    }
    .instrument(service_span)
    .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
