//! Sensor Record Definition

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::wire::{ID_LEN, RECORD_LEN, TIMESTAMP_LEN, VALUE_LEN};

/// Sensor node identifier
pub type SensorId = u16;

/// Seconds since the Unix epoch
pub type Timestamp = i64;

/// One reading reported by a sensor node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Reporting sensor
    pub sensor_id: SensorId,
    /// Measured value (temperature for the current fleet)
    pub value: f64,
    /// Sensor-side time of the measurement
    pub timestamp: Timestamp,
}

impl SensorRecord {
    /// Create a new record
    pub fn new(sensor_id: SensorId, value: f64, timestamp: Timestamp) -> Self {
        Self {
            sensor_id,
            value,
            timestamp,
        }
    }

    /// Encode as the 18-byte wire record (host byte order)
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[..ID_LEN].copy_from_slice(&self.sensor_id.to_ne_bytes());
        out[ID_LEN..ID_LEN + VALUE_LEN].copy_from_slice(&self.value.to_ne_bytes());
        out[ID_LEN + VALUE_LEN..].copy_from_slice(&self.timestamp.to_ne_bytes());
        out
    }

    /// Decode a wire record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != RECORD_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: RECORD_LEN,
                actual: bytes.len(),
            });
        }

        let mut id = [0u8; ID_LEN];
        let mut value = [0u8; VALUE_LEN];
        let mut ts = [0u8; TIMESTAMP_LEN];
        id.copy_from_slice(&bytes[..ID_LEN]);
        value.copy_from_slice(&bytes[ID_LEN..ID_LEN + VALUE_LEN]);
        ts.copy_from_slice(&bytes[ID_LEN + VALUE_LEN..]);

        Ok(Self {
            sensor_id: u16::from_ne_bytes(id),
            value: f64::from_ne_bytes(value),
            timestamp: i64::from_ne_bytes(ts),
        })
    }

    /// Reject readings that cannot be averaged or stored
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.value.is_finite() {
            return Err(ProtocolError::NonFiniteValue {
                sensor_id: self.sensor_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_layout() {
        let record = SensorRecord::new(15, 21.5, 1000);
        let bytes = record.to_bytes();

        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[..2], &15u16.to_ne_bytes());
        assert_eq!(&bytes[2..10], &21.5f64.to_ne_bytes());
        assert_eq!(&bytes[10..], &1000i64.to_ne_bytes());
    }

    #[test]
    fn test_decode_matches_encode() {
        let record = SensorRecord::new(u16::MAX, -3.25, -1);
        let decoded = SensorRecord::from_bytes(&record.to_bytes()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = SensorRecord::from_bytes(&[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidLength { expected: 18, actual: 17 }
        ));
    }

    #[test]
    fn test_non_finite_value_rejected() {
        assert!(SensorRecord::new(1, f64::NAN, 0).validate().is_err());
        assert!(SensorRecord::new(1, f64::INFINITY, 0).validate().is_err());
        assert!(SensorRecord::new(1, 19.0, 0).validate().is_ok());
    }
}
