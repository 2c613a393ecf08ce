//! Shared Buffer Error Types

use thiserror::Error;

use crate::ConsumerId;

/// Errors returned by the shared buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Every consumer slot is taken
    #[error("consumer table is full ({capacity} slots)")]
    ConsumerTableFull { capacity: usize },

    /// Id registered twice
    #[error("consumer {0} is already registered")]
    DuplicateConsumer(ConsumerId),

    /// Registration attempted after the buffer was used or began draining
    #[error("consumer registration is closed")]
    RegistrationClosed,

    /// Buffer configuration is unusable
    #[error("invalid buffer configuration: {0}")]
    InvalidConfig(String),

    /// Id was never registered
    #[error("consumer {0} is not registered")]
    UnknownConsumer(ConsumerId),

    /// Buffer is draining and holds nothing unseen for this consumer
    #[error("end of stream")]
    EndOfStream,

    /// Another thread panicked while holding the queue lock
    #[error("buffer lock poisoned: {0}")]
    Poisoned(String),
}

impl BufferError {
    /// Whether this error stems from setting the buffer up incorrectly
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BufferError::ConsumerTableFull { .. }
                | BufferError::DuplicateConsumer(_)
                | BufferError::RegistrationClosed
                | BufferError::InvalidConfig(_)
        )
    }
}
