// Portal notifier - deadline reminder daemon
// Loads configuration, opens the database and drives the orchestrator
// until Ctrl-C.

use portal_notifier::config::NotifierConfig;
use portal_notifier::database::{create_pool, Repository};
use portal_notifier::services::{cancel_on_sign_out, Orchestrator, SessionHandle};
use portal_notifier::stores::Stores;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Principal the daemon runs reminders under
const SERVICE_PRINCIPAL: &str = "portal-notifier";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portal_notifier=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting portal notifier");

    let config = NotifierConfig::from_env()?;
    tracing::info!(
        database = ?config.database_path,
        maintenance = config.maintenance_mode,
        interval_secs = config.poll_interval.as_secs(),
        "Configuration loaded"
    );

    let pool = create_pool(&config.database_path).await?;
    let stores = Stores::from_backend(Arc::new(Repository::new(pool.clone())));

    let session = SessionHandle::new();
    session.sign_in(SERVICE_PRINCIPAL);

    let orchestrator = Arc::new(Orchestrator::new(stores, &config, Arc::new(session.clone())));
    let cancel = CancellationToken::new();
    let watcher = cancel_on_sign_out(session.clone(), cancel.clone());
    let driver = orchestrator.spawn(cancel.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    session.sign_out();
    cancel.cancel();
    driver.await?;
    watcher.await?;
    pool.close().await;

    tracing::info!("Portal notifier stopped");
    Ok(())
}
