//! Error types for the reconciliation crate.

use snow_common::SnowError;
use storage::StorageError;
use thiserror::Error;

/// Setup-time failures that abort a run before any work starts.
///
/// Per-date fetch failures and per-pixel save failures are never returned
/// here; they are recorded in the run statistics.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid input: {0}")]
    Invalid(#[from] SnowError),

    #[error("No pixels to process: {0}")]
    EmptyInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
