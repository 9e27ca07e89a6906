//! Error types for gridrun
//!
//! Configuration and durability errors end a run. Degraded-sink and
//! dedup-read errors never leave [`ResultSink`](crate::sink::ResultSink):
//! they are logged and recorded as [`DegradedSink`](crate::sink::DegradedSink)
//! events.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// gridrun error types
#[derive(Error, Debug)]
pub enum Error {
    /// Experiment spec or sink configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Required (durable) store rejected a write. The run must stop.
    #[error("Durability error: required store write failed for table '{table}': {reason}\nRows flushed before this point are intact.")]
    Durability {
        /// Destination table
        table: String,
        /// Underlying failure
        reason: String,
    },

    /// Optional sink unreachable or rejected a write
    #[error("Degraded sink {sink}: {reason}")]
    DegradedSink {
        /// Sink that failed
        sink: String,
        /// Underlying failure
        reason: String,
    },

    /// Reading existing rows for deduplication failed
    #[error("Dedup read failed from {sink}: {reason}")]
    DedupRead {
        /// Sink that was read
        sink: String,
        /// Underlying failure
        reason: String,
    },

    /// Result sink used after `final_flush`
    #[error("Result sink is closed (final_flush already ran)")]
    SinkClosed,

    /// Storage error (Parquet/Arrow layout, schema conversion)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Unit of work failed
    #[error("Computation failed: {0}")]
    Computation(String),

    /// Worker pool could not be built or accept work
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether this error must terminate a run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::DegradedSink { .. } | Self::DedupRead { .. })
    }
}
