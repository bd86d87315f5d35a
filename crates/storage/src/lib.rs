//! Storage for the snow-cover pixel archive.
//!
//! Provides:
//! - A key-value backend contract ([`KvBackend`]) with memory, file,
//!   SQLite, PostgreSQL and Redis implementations
//! - The [`PixelArchive`]: per-pixel yearly/weekly observation records with
//!   gap detection and error-code cleanup

pub mod archive;
pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod postgres;
pub mod redis_store;
pub mod sqlite;

pub use archive::{apply_observation, missing_weeks_in, ArchiveStats, PixelArchive, KEY_PREFIX};
pub use backend::{BackendConfig, BackendKind, KvBackend};
pub use error::{Result, StorageError};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use redis_store::RedisBackend;
pub use sqlite::SqliteBackend;
