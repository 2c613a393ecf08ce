//! Sensor node simulator: streams synthetic readings into a running gateway

use clap::Parser;
use gateway::cli::{LogFormat, SimCli};
use gateway::init_logging;
use gateway::sim::{simulate, SimConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = SimCli::parse();
    init_logging(&cli.log_level, LogFormat::Text)?;

    simulate(SimConfig::from(&cli)).await?;
    Ok(())
}
