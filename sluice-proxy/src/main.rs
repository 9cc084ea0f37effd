//! Sluice Proxy Engine
//!
//! Hosts the server pools: loads their configuration, probes group health,
//! keeps every pool's continuum rebuilt, and serves diagnostics.

#![deny(missing_docs)]

mod config;
mod health_check;
mod registry;
mod scheduler;
mod server;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sluice_core::{Clock, SystemClock};
use tracing::{error, info};

use crate::config::Config;
use crate::health_check::prober::{spawn_health_checker, EjectPolicy};
use crate::registry::PoolRegistry;
use crate::scheduler::spawn_scheduler;

/// Weighted modulo distribution across backend server groups.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SLUICE_CONFIG", default_value = "sluice.toml")]
    config: PathBuf,

    /// Override the configured log level.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the diagnostics listen address.
    #[arg(long)]
    stats_listen: Option<std::net::SocketAddr>,
}

/// The primary entrypoint for the Sluice proxy.
///
/// This initializes the multi-threaded Tokio runtime, loads the configuration,
/// and starts one scheduler and one health checker per pool.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    telemetry::init(cli.log_level.as_deref().unwrap_or(&config.log.level));

    let registry = Arc::new(PoolRegistry::from_config(&config.pools));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    info!(pools = registry.len(), "starting sluice");

    let mut tasks = Vec::new();
    for section in &config.pools {
        let handle = registry
            .get(&section.name)
            .with_context(|| format!("pool '{}' missing from registry", section.name))?;

        tasks.push(spawn_scheduler(
            handle.clone(),
            clock.clone(),
            section.rebuild_interval(),
        ));
        tasks.push(spawn_health_checker(
            handle,
            clock.clone(),
            EjectPolicy {
                failure_limit: section.server_failure_limit,
                retry_timeout: section.server_retry_timeout(),
            },
            section.probe_interval(),
            section.probe_timeout(),
        ));
    }

    let stats_addr = cli.stats_listen.unwrap_or(config.stats.listen);
    let stats = tokio::spawn(server::start_server(stats_addr, registry.clone()));

    tokio::select! {
        result = stats => {
            match result {
                Ok(Err(e)) => error!(error = %e, "stats server failed"),
                Err(e) => error!(error = %e, "stats server task panicked"),
                Ok(Ok(())) => {}
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!("shutdown requested");
        }
    }

    for task in tasks {
        task.abort();
    }
    info!("shutting down gracefully");
    Ok(())
}
