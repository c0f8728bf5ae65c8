//! Prometheus exporter for HomeKit bridge accessories.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use homekit_common::LoggingConfig;
use tokio::sync::watch;
use tracing::{error, info};

use homekit_exporter::{BridgeClient, ExporterConfig, HttpServer, MetricRegistry, Poller};

/// Prometheus exporter for HomeKit bridge accessories.
#[derive(Parser, Debug)]
#[command(name = "homekit-exporter")]
#[command(about = "Export HomeKit bridge accessory state as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (YAML format).
    #[arg(short, long, default_value = "homekit_exporter.yaml")]
    config: PathBuf,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ExporterConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Override listen address from CLI
    if let Some(listen) = args.listen {
        config.exporter.listen = listen;
    }

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    homekit_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting HomeKit Prometheus Exporter");
    info!("Loaded configuration from {:?}", args.config);
    config.warn_defaulted();

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(MetricRegistry::new());

    // Parse listen address
    let listen_addr: SocketAddr = config
        .exporter
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Create components
    let client = BridgeClient::new(&config.connection).context("Failed to create bridge client")?;
    let poller = Poller::new(client, registry.clone(), &config);
    let http_server = HttpServer::new(
        registry.clone(),
        listen_addr,
        config.exporter.path.clone(),
    );

    // Start poller
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let mut http_task = tokio::spawn(async move { http_server.run(http_shutdown).await });

    // Wait for shutdown signal, or for the HTTP server to die on its own
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = &mut http_task => {
            shutdown_tx.send(true).ok();
            let _ = tokio::time::timeout(Duration::from_secs(5), poller_task).await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!(error = %e, "Scrape endpoint failed");
                    Err(e.into())
                }
                Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
            };
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = poller_task.await;
        let _ = http_task.await;
    })
    .await;

    // Print final stats
    let stats = registry.stats();
    info!(
        cycles_total = stats.cycles_total,
        cycles_failed = stats.cycles_failed,
        targets_failed = stats.targets_failed,
        series_count = registry.series_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Resolve when SIGTERM is received (never on non-unix platforms).
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
