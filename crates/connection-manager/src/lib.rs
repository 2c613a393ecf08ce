//! Sensor Connection Manager
//!
//! Accepts sensor node connections, multiplexes their sockets in a single
//! task, reassembles wire records and forwards them to the shared buffer.
//! Idle connections are evicted, and the whole manager shuts down (draining
//! the buffer) once no sensor has spoken for the configured timeout.

mod config;
mod connection;
mod error;
mod manager;

pub use config::{ConnMgrConfig, DEFAULT_TIMEOUT_SECS};
pub use connection::{Connection, ConnectionState};
pub use error::ConnMgrError;
pub use manager::{listen, ConnectionManager, ConnectionStats, ListenSummary, StopHandle, Termination};
