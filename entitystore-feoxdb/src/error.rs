use bincode::error::{DecodeError, EncodeError};
use feoxdb::FeoxError;
use thiserror::Error;

/// Errors that can occur when using [`FeOxEngine`](crate::FeOxEngine).
#[derive(Debug, Error)]
pub enum FeOxEngineError {
    /// An error from the underlying FeOxDB database.
    #[error("FeOxDB error: {0}")]
    FeOxDb(#[from] FeoxError),

    /// Failed to serialize a row.
    #[error("Serialization error: {0}")]
    Serialization(#[from] EncodeError),

    /// Failed to deserialize a row.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] DecodeError),

    /// An I/O error occurred while accessing the database file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<FeOxEngineError> for entitystore_core::EntityStoreError {
    fn from(error: FeOxEngineError) -> Self {
        entitystore_core::EntityStoreError::Engine(Box::new(error))
    }
}
