//! # Theme park provider
//!
//! Loads Ride and Operator manifests into an in-memory store and keeps
//! every Ride's status in line with the Operators assigned to it.
//!
//! ## Shutdown
//!
//! SIGTERM/SIGINT stop the reconciliation loop; in-flight reconciles are
//! cancelled and drained before the process exits.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use themepark::Provider;
use themepark::cli::{Cli, Commands};
use themepark_core::load_manifests;
use themepark_reconciler::ProviderConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = cli
        .provider_config()
        .context("Invalid provider configuration")?;

    match &cli.command {
        Commands::Run { manifests, .. } => run(config, manifests).await,
        Commands::Check { manifests } => check(config, manifests).await,
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn load(config: ProviderConfig, manifests: &Path) -> Result<Provider> {
    let resources = load_manifests(manifests)
        .with_context(|| format!("Failed to load manifests from {}", manifests.display()))?;
    let provider = Provider::new(config).context("Failed to build provider")?;
    provider
        .seed(resources)
        .await
        .context("Failed to seed resources")?;
    Ok(provider)
}

async fn run(config: ProviderConfig, manifests: &Path) -> Result<()> {
    info!(
        endpoint = %config.provider_endpoint,
        poll_interval_secs = config.poll_interval_secs,
        max_reconcile_rate = config.max_reconcile_rate,
        "Theme park provider starting"
    );
    let provider = load(config, manifests).await?;

    info!("Provider is running. Press Ctrl+C to stop.");
    let stats = provider
        .run(wait_for_shutdown())
        .await
        .context("Reconciliation loop failed")?;

    info!(
        dispatched = stats.dispatched,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Theme park provider stopped gracefully"
    );
    Ok(())
}

async fn check(config: ProviderConfig, manifests: &Path) -> Result<()> {
    let provider = load(config, manifests).await?;
    let statuses = provider.check().await.context("Check pass failed")?;
    let json = serde_json::to_string_pretty(&statuses).context("Failed to encode statuses")?;
    println!("{json}");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
