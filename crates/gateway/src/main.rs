//! Sensor Gateway - Main Entry Point

use anyhow::Context;
use clap::Parser;
use gateway::cli::Cli;
use gateway::{init_logging, GatewayConfig, Pipeline};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    info!("=== Sensor Gateway v{} ===", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    info!("Configuration: {:?}", config);

    let pipeline = Pipeline::start(&config, cli.port).await?;

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                stop.stop();
            }
            Err(e) => warn!("Cannot listen for interrupts: {}", e),
        }
    });

    let report = pipeline.wait().await?;
    info!(
        "Served {} connections ({} peer closes, {} idle evictions, {} rejected records)",
        report.listen.stats.accepted,
        report.listen.stats.peer_closes,
        report.listen.stats.idle_evictions,
        report.listen.stats.rejected
    );
    Ok(())
}
