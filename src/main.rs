//! # Session Keeper
//!
//! Keeps authenticated WebSocket sessions alive for one identity, one
//! session per configured proxy.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Proxy list and session supervisor

use anyhow::Result;
use tracing::info;

use session_keeper::config::Settings;
use session_keeper::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    session_keeper::telemetry::init_tracing();

    info!("Starting Session Keeper...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        environment = %settings.environment,
        proxy_source = ?settings.proxy.source,
        verify_proxies = settings.proxy.verify,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Sessions starting");
    application.run_until_stopped().await?;

    Ok(())
}
