//! crash-harness binary entry point.
//!
//! Usage:
//! ```bash
//! crash-harness --config harness.toml
//! crash-harness --memory --crash-threshold 20
//! crash-harness --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use mqcrash_harness_server::config::{BrokerBackend, Config};
use mqcrash_harness_server::http::{build_router, health};
use mqcrash_harness_server::Harness;
use harness_relay::ProcessHalt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Message relay and crash-injection harness.
#[derive(Parser, Debug)]
#[command(name = "crash-harness")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(long, env = "CRASH_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address, e.g. 127.0.0.1:8080
    #[arg(long)]
    bind: Option<String>,

    /// SQLite broker database file
    #[arg(long, conflicts_with = "memory")]
    database: Option<PathBuf>,

    /// Kill the process on every multiple of this many relayed messages (0 disables)
    #[arg(long)]
    crash_threshold: Option<u64>,

    /// Do not run the relay in this process
    #[arg(long)]
    no_relay: bool,

    /// Use the in-memory broker instead of SQLite
    #[arg(long)]
    memory: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// Load the configuration file (if any) and apply flag overrides.
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(bind) = &self.bind {
            config.http.bind_address = bind.clone();
        }
        if let Some(database) = &self.database {
            config.broker.backend = BrokerBackend::Sqlite;
            config.broker.database = database.clone();
        }
        if self.memory {
            config.broker.backend = BrokerBackend::Memory;
        }
        if let Some(threshold) = self.crash_threshold {
            config.relay.crash_threshold = threshold;
        }
        if self.no_relay {
            config.relay.enabled = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = cli.load_config()?;
    let bind_address = config.http.bind_address.clone();

    health::init_start_time();
    let harness = Arc::new(
        Harness::open(config)
            .await
            .context("failed to start harness")?,
    );

    let relay = harness.start_relay(Arc::new(ProcessHalt));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(
        address = %listener.local_addr()?,
        version = env!("CARGO_PKG_VERSION"),
        "crash-harness listening"
    );

    axum::serve(listener, build_router(Arc::clone(&harness)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(pool) = relay {
        pool.shutdown().await;
    }
    tracing::info!(processed = harness.processed(), "crash-harness stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    tracing::info!("Received shutdown signal");
}
