//! Application Startup
//!
//! Builds the session supervisor from settings and runs it until Ctrl-C or
//! until every slot has ended.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::application::Supervisor;
use crate::config::{ProxySource, Settings};
use crate::domain::{Identity, ProxyDescriptor};
use crate::infrastructure::{load_proxies, HttpProbeResolver, WebSocketConnector};

/// Application instance
pub struct Application {
    settings: Settings,
    identity: Identity,
    bindings: Vec<Option<ProxyDescriptor>>,
    supervisor: Supervisor,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let identity = settings.identity()?;
        let controller_config = Arc::new(settings.controller_config()?);
        let bindings = load_bindings(&settings).await?;

        let connector = Arc::new(WebSocketConnector::new());
        let resolver = Arc::new(HttpProbeResolver::new(
            settings.server.ip_check_url.clone(),
            settings.proxy.verify_timeout(),
        ));

        let supervisor = Supervisor::new(controller_config, connector, resolver)
            .with_restart_policy(settings.restart_policy());

        info!(
            identity = %identity,
            slots = bindings.len(),
            endpoints = ?settings.server.endpoints,
            "Application built"
        );

        Ok(Self {
            settings,
            identity,
            bindings,
            supervisor,
        })
    }

    /// Run all session slots until Ctrl-C or until every slot has ended.
    ///
    /// Fails when every slot gave up.
    pub async fn run_until_stopped(self) -> Result<()> {
        let Self {
            settings,
            identity,
            bindings,
            supervisor,
        } = self;
        supervisor.spawn(&identity, bindings);

        let period = settings.supervisor.status_interval();
        let mut status_ticker = interval_at(Instant::now() + period, period);
        status_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = supervisor.wait() => {
                    warn!("All session slots have ended");
                    break;
                }
                _ = status_ticker.tick() => {
                    let summary = supervisor.summary();
                    info!(
                        total = summary.total,
                        authenticated = summary.authenticated,
                        connecting = summary.connecting,
                        failed = summary.failed,
                        stopped = summary.stopped,
                        "Session status"
                    );
                }
            }
        }

        supervisor.shutdown().await;
        let summary = supervisor.summary();
        info!(?summary, "All sessions stopped");

        if summary.total > 0 && summary.failed == summary.total {
            bail!("all {} session slots failed permanently", summary.total);
        }
        Ok(())
    }
}

/// One binding per proxy, or a single direct binding.
async fn load_bindings(settings: &Settings) -> Result<Vec<Option<ProxyDescriptor>>> {
    match settings.proxy.source {
        ProxySource::None => Ok(vec![None]),
        ProxySource::Custom => {
            let filename = &settings.proxy.filename;
            let proxies = load_proxies(filename)
                .await
                .with_context(|| format!("Failed to read proxy list {}", filename))?;
            if proxies.is_empty() {
                bail!("No usable proxies in {}", filename);
            }
            Ok(proxies.into_iter().map(Some).collect())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
