//! Multi-Consumer Shared Buffer
//!
//! The single integration point between the connection manager and every
//! downstream stage. Each registered consumer reads every inserted record
//! exactly once and in insertion order; an entry stays queued until the
//! slowest consumer has read it.

mod buffer;
mod error;

pub use buffer::{BufferConfig, ConsumerId, SharedBuffer, DEFAULT_MAX_CONSUMERS, MAX_CONSUMER_SLOTS};
pub use error::BufferError;
