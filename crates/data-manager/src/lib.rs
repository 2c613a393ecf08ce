//! Data Manager
//!
//! Consumes sensor records from the shared buffer, keeps a rolling window of
//! readings per sensor and reports rooms whose running average leaves the
//! configured temperature band.

mod error;
mod manager;
mod sensor_map;
mod window;

pub use error::DataError;
pub use manager::{Alert, AlertConfig, AlertKind, DataManager, DEFAULT_WINDOW};
pub use sensor_map::{RoomId, SensorMap};
pub use window::RunningAverage;
