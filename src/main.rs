//! Resilience monitor.
//!
//! Probes configured downstream dependencies through per-dependency circuit
//! breakers, traces every probe and admin request, and serves the fleet
//! health dashboard over a read-only HTTP API.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                 RESILIENCE MONITOR                    │
//!                 │                                                       │
//!   Dependency ◀──┼── probe ──▶ CircuitBreakerWithFallback ──▶ spans ───┐ │
//!   (HTTP GET)    │     │            (per dependency)                   │ │
//!                 │     ▼                                                ▼ │
//!                 │  error records ──▶ MetricsAggregator      TraceRecorder
//!                 │                        │                        │     │
//!                 │                        ▼                        │     │
//!                 │             DashboardQueryService ◀── collector │     │
//!                 │                        │                        │     │
//!   monitor-cli ──┼──────────────▶  admin API  ◀────────────────────┘     │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use resilience_monitor::config::{load_config, MonitorConfig};
use resilience_monitor::lifecycle::{wait_for_shutdown_signal, Monitor, Shutdown};
use resilience_monitor::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "resilience-monitor")]
#[command(about = "Circuit breaker, tracing and fleet health monitor", long_about = None)]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => MonitorConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilience-monitor starting");
    if let Some(path) = &args.config {
        tracing::info!(path = %path.display(), "Configuration loaded");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let monitor = match Monitor::build(config) {
        Ok(monitor) => monitor,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        trigger.trigger();
    });

    monitor.run(shutdown).await?;
    Ok(())
}
