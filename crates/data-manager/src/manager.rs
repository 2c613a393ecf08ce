//! Data Manager Implementation

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use event_log::EventLog;
use sensor_protocol::{SensorId, SensorRecord, Timestamp};
use serde::{Deserialize, Serialize};
use shared_buffer::{BufferError, ConsumerId, SharedBuffer};
use tracing::{debug, info};

use crate::error::DataError;
use crate::sensor_map::{RoomId, SensorMap};
use crate::window::RunningAverage;

/// Default number of readings in the running average
pub const DEFAULT_WINDOW: usize = 5;

/// Alert configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Running average below this is too cold (default: 10.0)
    pub min_temp: f64,
    /// Running average above this is too hot (default: 20.0)
    pub max_temp: f64,
    /// Readings per running average
    pub window: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            min_temp: 10.0,
            max_temp: 20.0,
            window: DEFAULT_WINDOW,
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        if !self.min_temp.is_finite() || !self.max_temp.is_finite() {
            return Err(DataError::InvalidConfig(
                "temperature limits must be finite".to_string(),
            ));
        }
        if self.min_temp > self.max_temp {
            return Err(DataError::InvalidConfig(format!(
                "min_temp {} is above max_temp {}",
                self.min_temp, self.max_temp
            )));
        }
        if self.window == 0 {
            return Err(DataError::InvalidConfig("window must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Direction of a temperature excursion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    TooCold,
    TooHot,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::TooCold => write!(f, "too cold"),
            AlertKind::TooHot => write!(f, "too hot"),
        }
    }
}

/// A running average outside the configured band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub sensor_id: SensorId,
    pub room_id: RoomId,
    pub kind: AlertKind,
    pub running_avg: f64,
    pub timestamp: Timestamp,
}

impl Alert {
    /// Event log line for this alert
    pub fn message(&self) -> String {
        format!(
            "The sensor node with id:{} reports it's {} (running avg {:.6})",
            self.sensor_id, self.kind, self.running_avg
        )
    }
}

#[derive(Debug, Clone)]
struct SensorState {
    room_id: RoomId,
    window: RunningAverage,
    last_modified: Option<Timestamp>,
}

/// Per-sensor running averages and alerting
#[derive(Debug)]
pub struct DataManager {
    config: AlertConfig,
    sensors: BTreeMap<SensorId, SensorState>,
    processed: u64,
    rejected: u64,
}

impl DataManager {
    /// Create a manager tracking every sensor in `map`
    pub fn new(map: SensorMap, config: AlertConfig) -> Result<Self, DataError> {
        config.validate()?;
        info!(
            "Creating data manager for {} sensors with config: {:?}",
            map.len(),
            config
        );

        let sensors = map
            .iter()
            .map(|(sensor_id, room_id)| {
                (
                    sensor_id,
                    SensorState {
                        room_id,
                        window: RunningAverage::new(config.window),
                        last_modified: None,
                    },
                )
            })
            .collect();

        Ok(Self {
            config,
            sensors,
            processed: 0,
            rejected: 0,
        })
    }

    /// Fold one reading into its sensor's window.
    ///
    /// Readings from sensors missing in the map are logged and rejected with
    /// [`DataError::UnknownSensor`]; no state changes in that case.
    pub fn process(
        &mut self,
        record: &SensorRecord,
        events: &EventLog,
    ) -> Result<Option<Alert>, DataError> {
        let Some(sensor) = self.sensors.get_mut(&record.sensor_id) else {
            self.rejected += 1;
            events.warn(format!(
                "Received sensor data with invalid sensor node ID:{}",
                record.sensor_id
            ));
            return Err(DataError::UnknownSensor(record.sensor_id));
        };

        let running_avg = sensor.window.push(record.value);
        sensor.last_modified = Some(record.timestamp);
        self.processed += 1;

        let kind = if running_avg < self.config.min_temp {
            AlertKind::TooCold
        } else if running_avg > self.config.max_temp {
            AlertKind::TooHot
        } else {
            debug!(
                "Sensor {} running average {:.2} within range",
                record.sensor_id, running_avg
            );
            return Ok(None);
        };

        let alert = Alert {
            sensor_id: record.sensor_id,
            room_id: sensor.room_id,
            kind,
            running_avg,
            timestamp: record.timestamp,
        };
        events.warn(alert.message());
        Ok(Some(alert))
    }

    /// Consume records for `consumer_id` until the buffer drains or nothing
    /// arrives for `idle_timeout`. Returns the number of records consumed.
    pub fn run(
        &mut self,
        buffer: &SharedBuffer,
        consumer_id: ConsumerId,
        idle_timeout: Duration,
        events: &EventLog,
    ) -> Result<u64, DataError> {
        info!("Data manager consuming as {}", consumer_id);
        let mut consumed = 0u64;
        let mut last_read = Instant::now();

        loop {
            let remaining = idle_timeout.saturating_sub(last_read.elapsed());
            if remaining.is_zero() {
                info!("Data manager idle for {:?}, stopping", idle_timeout);
                break;
            }

            match buffer.consume_timeout(consumer_id, remaining) {
                Ok(Some(record)) => {
                    last_read = Instant::now();
                    consumed += 1;
                    match self.process(&record, events) {
                        Ok(_) | Err(DataError::UnknownSensor(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(None) => {}
                Err(BufferError::EndOfStream) => {
                    info!("Data manager reached end of stream");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Data manager finished: {} consumed, {} rejected",
            consumed, self.rejected
        );
        Ok(consumed)
    }

    fn sensor(&self, sensor_id: SensorId) -> Result<&SensorState, DataError> {
        self.sensors
            .get(&sensor_id)
            .ok_or(DataError::UnknownSensor(sensor_id))
    }

    /// Room the sensor is installed in
    pub fn room_id(&self, sensor_id: SensorId) -> Result<RoomId, DataError> {
        Ok(self.sensor(sensor_id)?.room_id)
    }

    /// Mean of the sensor's window; `None` before its first reading
    pub fn running_average(&self, sensor_id: SensorId) -> Result<Option<f64>, DataError> {
        Ok(self.sensor(sensor_id)?.window.mean())
    }

    /// Timestamp of the sensor's latest reading
    pub fn last_modified(&self, sensor_id: SensorId) -> Result<Option<Timestamp>, DataError> {
        Ok(self.sensor(sensor_id)?.last_modified)
    }

    /// Number of sensors in the map
    pub fn total_sensors(&self) -> usize {
        self.sensors.len()
    }

    /// Readings folded into a window
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Readings from unknown sensors
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }
}
