//! Standalone gate process.
//!
//! Serves the health check behind the general limiter and the security
//! filters. Application routes are mounted by embedding the library and
//! wrapping each route group with `Gate::limit`.

use std::net::SocketAddr;

use axum::Router;
use clap::Parser;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use foodsaver_gate::config::{GateConfig, LoggingConfig};
use foodsaver_gate::server::{Gate, GateServer};
use foodsaver_gate::store::open_store;
use foodsaver_gate::sweep::Sweeper;

/// Admission control for the FoodSaver API.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if args.json_logs {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting FoodSaver Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        addr = %config.server.addr,
        trust_proxy = config.server.trust_proxy,
        redis = config.store.redis_url.is_some(),
        "Configuration loaded"
    );

    let store = open_store(&config.store).await;
    let gate = Gate::from_config(&config, store.clone())?;
    info!(store = %store.mode(), "Admission pipeline initialized");
    for (name, policy) in gate.pipeline().registry().iter() {
        debug!(
            limiter = %name,
            window_ms = policy.window().as_millis() as u64,
            max_requests = policy.max_requests(),
            "Limiter policy"
        );
    }

    let sweeper = Sweeper::spawn(store, gate.pipeline().guard().clone(), config.store.sweep_interval());

    let server = GateServer::new(config.server.addr, gate.router(Router::new()));
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.shutdown().await;
    // Last handle on the counter store; releases the Redis connection.
    drop(gate);
    info!("FoodSaver Gate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
