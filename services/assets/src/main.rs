use anyhow::{Context, Result};
use asset_service::api::{start_api_server, AppState};
use asset_service::{
    AssetService, AssetStore, Config, CredentialIssuer, PgAssetStore, S3CredentialIssuer,
    ServiceSettings,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Asset Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let store = PgAssetStore::new(&config.database)
        .await
        .context("Failed to initialize asset store")?;

    // Run migrations if enabled
    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let issuer = S3CredentialIssuer::from_config(&config.s3)
        .await
        .context("Failed to initialize S3 credential issuer")?
        .map(|issuer| Arc::new(issuer) as Arc<dyn CredentialIssuer>);

    if issuer.is_none() {
        info!("Running in metadata-only mode");
    }

    let service = AssetService::new(
        Arc::new(store) as Arc<dyn AssetStore>,
        issuer,
        ServiceSettings::from_config(&config),
    );

    let api_state = AppState {
        service: Arc::new(service),
    };

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    info!("Asset service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down asset service");
}
