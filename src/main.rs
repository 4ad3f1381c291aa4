//! Entry point for the hardware-recovery controller's HTTP front and job
//! worker pool.
//!
//! Wiring follows the teacher's `webhook_server.rs`: build the dependency
//! graph explicitly in `main`, bind one listener, serve until shutdown.

use std::sync::Arc;

use tokio::sync::mpsc;

use hardware_recovery_controller::config::Config;
use hardware_recovery_controller::http;
use hardware_recovery_controller::http::auth::ReqwestAuthVerifier;
use hardware_recovery_controller::notifier::ReqwestNotifyClient;
use hardware_recovery_controller::registry::Registry;
use hardware_recovery_controller::resolver::HickoryHostResolver;
use hardware_recovery_controller::ticket::ReqwestTicketFiler;
use hardware_recovery_controller::worker::store::{InMemoryJobStore, JobStore, PostgresJobStore};
use hardware_recovery_controller::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new("info,hardware_recovery_controller=debug"),
        ))
        .json()
        .init();

    let config = Config::from_env()?;
    tracing::info!(bind_addr = %config.bind_addr, "starting hardware-recovery controller");

    let registry = Arc::new(Registry::load(&config.worker_config_path)?);
    let resolver = Arc::new(HickoryHostResolver::new()?);
    let auth_verifier = Arc::new(ReqwestAuthVerifier::new(config.auth_verifier_url.clone()));
    let notifier = Arc::new(
        ReqwestNotifyClient::new(config.notify_base_url.clone())
            .with_defaults(config.notify_email.clone(), config.notify_irc_channel.clone()),
    );
    let ticket_filer = Arc::new(ReqwestTicketFiler::new(config.clone()));

    let job_store: Arc<dyn JobStore> = if let Some(database_url) = config.database_url.clone() {
        Arc::new(PostgresJobStore::connect(&database_url).await?)
    } else {
        tracing::warn!("DATABASE_URL not set, using in-memory job store (not durable)");
        Arc::new(InMemoryJobStore::new())
    };

    let (job_tx, job_rx) = mpsc::channel(config.job_queue_capacity);

    let worker = Worker::new(
        config.clone(),
        registry.clone(),
        resolver.clone(),
        notifier.clone(),
        ticket_filer.clone(),
        job_store.clone(),
    );
    worker.spawn_pool(job_rx, config.worker_concurrency);

    let app_state = http::AppState {
        config: config.clone(),
        registry,
        auth_verifier,
        job_store,
        job_tx,
    };

    let router = http::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
