//! Command line interfaces of the gateway and the simulator

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Sensor gateway: collects sensor readings over TCP, averages and stores them
#[derive(Parser, Debug)]
#[command(name = "gateway", version, about, long_about = None)]
pub struct Cli {
    /// TCP port sensor nodes connect to
    pub port: u16,

    /// Configuration file (optional)
    #[arg(short, long, default_value = "gateway.toml", env = "GATEWAY_CONFIG")]
    pub config: PathBuf,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Sensor node simulator: sends synthetic readings to a gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "sensor-sim", version, about, long_about = None)]
pub struct SimCli {
    /// Gateway address
    #[arg(default_value = "127.0.0.1:1234")]
    pub addr: SocketAddr,

    /// Sensor ids to simulate, one connection each
    #[arg(short, long = "sensor", value_delimiter = ',', default_value = "15")]
    pub sensors: Vec<u16>,

    /// Readings per sensor
    #[arg(short = 'n', long, default_value_t = 10)]
    pub count: u32,

    /// Pause between readings in milliseconds
    #[arg(short, long, default_value_t = 500)]
    pub interval_ms: u64,

    /// Lowest simulated temperature
    #[arg(long, default_value_t = 15.0)]
    pub min: f64,

    /// Highest simulated temperature
    #[arg(long, default_value_t = 25.0)]
    pub max: f64,

    /// Log level or filter directive
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}
