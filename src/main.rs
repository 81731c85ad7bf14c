//! mailbridge - Entry point for the mail gateway process

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mailbridge::config::Settings;
use mailbridge::providers::email::ImapConnector;
use mailbridge::services::SessionRegistry;
use mailbridge::Gateway;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "MAILBRIDGE_CONFIG";

fn settings_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(Settings::default_path)
}

fn load_settings() -> anyhow::Result<Settings> {
    match settings_path() {
        Some(path) => Settings::load_or_default(&path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Starting mailbridge");

    let connector = ImapConnector::new(settings.imap_config());
    let gateway = Gateway::with_registry(
        SessionRegistry::new(Arc::new(connector)),
        settings.query_defaults(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    let closed = gateway.shutdown().await;
    tracing::info!(sessions = closed, "Shut down mailbridge");
    Ok(())
}
