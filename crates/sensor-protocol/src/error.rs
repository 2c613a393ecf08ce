//! Protocol Error Types

use thiserror::Error;

use crate::SensorId;

/// Errors raised while encoding, decoding or sending sensor records
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Value is NaN or infinite
    #[error("sensor {sensor_id} sent a non-finite value")]
    NonFiniteValue { sensor_id: SensorId },

    /// Buffer does not hold exactly one record
    #[error("expected {expected} bytes for a record, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err.to_string())
    }
}
