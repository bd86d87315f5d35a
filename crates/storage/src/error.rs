//! Storage error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend '{0}' is not initialized")]
    NotInitialized(&'static str),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    pub fn database(e: impl std::fmt::Display) -> Self {
        StorageError::Database(e.to_string())
    }

    pub fn cache(e: impl std::fmt::Display) -> Self {
        StorageError::Cache(e.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::database(e)
    }
}

impl From<::redis::RedisError> for StorageError {
    fn from(e: ::redis::RedisError) -> Self {
        StorageError::cache(e)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
