//! Sensor Wire Protocol
//!
//! Defines the reading produced by a sensor node and the fixed-width record
//! that nodes stream over TCP. Fields are sent back-to-back in host byte order
//! with no framing beyond their fixed sizes.

mod client;
mod decoder;
mod error;
mod record;

pub use client::SensorNode;
pub use decoder::RecordDecoder;
pub use error::ProtocolError;
pub use record::{SensorId, SensorRecord, Timestamp};

/// Wire layout constants
pub mod wire {
    /// Size of the sensor id field
    pub const ID_LEN: usize = 2;
    /// Size of the value field (IEEE-754 double)
    pub const VALUE_LEN: usize = 8;
    /// Size of the timestamp field (signed epoch seconds)
    pub const TIMESTAMP_LEN: usize = 8;
    /// Total size of one record on the wire
    pub const RECORD_LEN: usize = ID_LEN + VALUE_LEN + TIMESTAMP_LEN;
}
