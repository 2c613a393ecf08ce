//! Sensor node simulator

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use sensor_protocol::{ProtocolError, SensorId, SensorNode};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::cli::SimCli;

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub addr: SocketAddr,
    pub sensors: Vec<SensorId>,
    pub count: u32,
    pub interval: Duration,
    pub min: f64,
    pub max: f64,
}

impl From<&SimCli> for SimConfig {
    fn from(cli: &SimCli) -> Self {
        Self {
            addr: cli.addr,
            sensors: cli.sensors.clone(),
            count: cli.count,
            interval: Duration::from_millis(cli.interval_ms),
            min: cli.min,
            max: cli.max,
        }
    }
}

/// Temperature of reading `step` for a sensor: a slow sine between `min`
/// and `max`, phase-shifted per sensor
pub fn reading(sensor_id: SensorId, step: u32, min: f64, max: f64) -> f64 {
    let mid = (min + max) / 2.0;
    let amplitude = (max - min) / 2.0;
    let phase = f64::from(step) * 0.4 + f64::from(sensor_id);
    mid + amplitude * phase.sin()
}

/// Connect one node per sensor and send `count` readings each.
/// Returns the total number of readings sent.
pub async fn simulate(config: SimConfig) -> Result<u64, ProtocolError> {
    let mut nodes = JoinSet::new();

    for sensor_id in config.sensors.iter().copied() {
        let config = config.clone();
        nodes.spawn(async move {
            let mut node = SensorNode::connect(config.addr, sensor_id).await?;

            for step in 0..config.count {
                if step > 0 {
                    tokio::time::sleep(config.interval).await;
                }
                let value = reading(sensor_id, step, config.min, config.max);
                node.send(value, Utc::now().timestamp()).await?;
                debug!("Sensor {} sent {:.2}", sensor_id, value);
            }

            let sent = node.sent();
            node.close().await?;
            Ok::<u64, ProtocolError>(sent)
        });
    }

    let mut total = 0;
    while let Some(joined) = nodes.join_next().await {
        let sent = joined.map_err(|e| ProtocolError::Io(e.to_string()))??;
        total += sent;
    }
    info!("Simulation finished: {} readings from {} sensors", total, config.sensors.len());
    Ok(total)
}
