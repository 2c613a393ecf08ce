//! Sensor Gateway
//!
//! Wires the connection manager, the shared buffer, both consumers and the
//! event log collector into one process.

pub mod cli;
pub mod config;
pub mod pipeline;
pub mod sim;

pub use config::{GatewayConfig, StorageSettings};
pub use pipeline::{Pipeline, PipelineReport, DATA_MANAGER_ID, STORAGE_MANAGER_ID};

use cli::LogFormat;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global tracing subscriber; `RUST_LOG` overrides `level`
pub fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    match format {
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
