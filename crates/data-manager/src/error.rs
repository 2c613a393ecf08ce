//! Data Manager Error Types

use sensor_protocol::SensorId;
use shared_buffer::BufferError;
use thiserror::Error;

/// Errors raised by the averaging consumer
#[derive(Debug, Error)]
pub enum DataError {
    /// Sensor map could not be read
    #[error("Failed to read sensor map: {0}")]
    Io(#[from] std::io::Error),

    /// Sensor map is not a sequence of `<room id> <sensor id>` pairs
    #[error("Invalid sensor map at line {line}: {reason}")]
    InvalidMap { line: usize, reason: String },

    /// Reading for a sensor that is not in the map
    #[error("Unknown sensor id {0}")]
    UnknownSensor(SensorId),

    /// Alert configuration is unusable
    #[error("Invalid alert configuration: {0}")]
    InvalidConfig(String),

    /// Shared buffer failure
    #[error(transparent)]
    Buffer(#[from] BufferError),
}
