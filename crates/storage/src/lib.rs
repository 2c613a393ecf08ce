//! Storage Layer
//!
//! Persists every sensor reading into SQLite through a repository, and runs
//! the persistence consumer that feeds it from the shared buffer.

mod manager;
mod repository;

pub use manager::StorageManager;
pub use repository::{Repository, StorageConfig, StoredReading, DEFAULT_TABLE};

use shared_buffer::BufferError;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Could not connect to {url} after {attempts} attempts: {source}")]
    Connect {
        url: String,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}
