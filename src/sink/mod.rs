//! Result persistence: one required durable store, up to two optional sinks
//!
//! **Append-only write pattern**: every sink receives whole batches, never
//! row updates. The durable store is the system of record; the relational
//! sink and the warehouse are copies whose failures are tolerated.
//!
//! ```text
//!                push ──> ResultBatch ──(rows >= max_rows | age > max_age | final)──┐
//!                                                                                  v
//!   ParquetStore (required, fatal on error) <── flush ──> SqliteSink   (optional, logged)
//!                                                   └──> Warehouse    (optional, logged;
//!                                                                      credentials > project id)
//! ```
//!
//! Reads for deduplication come from the warehouse if one is configured,
//! otherwise from the durable store. The relational sink is write-only.

mod convert;
mod parquet_store;
mod result_sink;
mod sqlite;
mod warehouse;

pub use convert::{batch_to_rows, rows_to_batch};
pub use parquet_store::ParquetStore;
pub use result_sink::{FlushReport, ResultSink, ResultSinkBuilder};
pub use sqlite::SqliteSink;
pub use warehouse::{MemoryWarehouse, Warehouse, WarehouseAuth};

use crate::record::ResultRecord;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Append-only destination for result rows.
pub trait RowSink: Send {
    /// Append `rows` to `table`, creating the table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows could not be written.
    fn append(&mut self, table: &str, rows: &[ResultRecord]) -> Result<()>;

    /// Release the underlying handle. Later appends may fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle could not be closed cleanly.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Read side of a sink: simple column projection, no query language.
pub trait RowSource {
    /// Rows of `table` restricted to `columns` (all columns when empty).
    /// Missing columns read as `Null`. `Ok(None)` when the table does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the table exists but could not be read.
    fn select(&self, table: &str, columns: &[String]) -> Result<Option<Vec<ResultRecord>>>;
}

/// A sink that can serve as the system of record.
pub trait DurableStore: RowSink + RowSource {}

impl<T: RowSink + RowSource> DurableStore for T {}

/// Which sink an event or outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkKind {
    /// Required durable store
    Durable,
    /// Optional relational store
    Relational,
    /// Optional warehouse, service-account credentials
    CredentialWarehouse,
    /// Optional warehouse, project-id auth
    ProjectWarehouse,
}

impl SinkKind {
    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Relational => "relational",
            Self::CredentialWarehouse => "warehouse(credentials)",
            Self::ProjectWarehouse => "warehouse(project)",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation that degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkOp {
    /// Appending a batch
    Write,
    /// Reading rows for dedup or reporting
    Read,
    /// Releasing the handle
    Close,
}

/// A tolerated sink failure. Recorded by [`ResultSink`] and logged, never thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedSink {
    /// Sink that failed
    pub kind: SinkKind,
    /// What it was doing
    pub op: SinkOp,
    /// Table involved
    pub table: String,
    /// Failure text
    pub reason: String,
    /// When it happened
    pub at: DateTime<Utc>,
}

impl DegradedSink {
    pub(crate) fn new(kind: SinkKind, op: SinkOp, table: &str, err: &Error) -> Self {
        Self {
            kind,
            op,
            table: table.to_string(),
            reason: err.to_string(),
            at: Utc::now(),
        }
    }

    /// Classified error for this event: reads are [`Error::DedupRead`],
    /// everything else [`Error::DegradedSink`].
    #[must_use]
    pub fn to_error(&self) -> Error {
        match self.op {
            SinkOp::Read => Error::DedupRead {
                sink: self.kind.to_string(),
                reason: self.reason.clone(),
            },
            SinkOp::Write | SinkOp::Close => Error::DegradedSink {
                sink: self.kind.to_string(),
                reason: self.reason.clone(),
            },
        }
    }
}

/// Flush thresholds. Whichever trips first wins; shutdown always flushes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlushPolicy {
    /// Flush once the batch holds this many rows
    #[serde(default = "FlushPolicy::default_max_rows")]
    pub max_rows: usize,
    /// Flush when a push arrives more than this many seconds after the last flush
    #[serde(default = "FlushPolicy::default_max_age_secs")]
    pub max_age_secs: f64,
}

impl FlushPolicy {
    const fn default_max_rows() -> usize {
        4096
    }

    const fn default_max_age_secs() -> f64 {
        60.0
    }

    /// Policy with explicit thresholds.
    #[must_use]
    pub fn new(max_rows: usize, max_age: Duration) -> Self {
        Self {
            max_rows,
            max_age_secs: max_age.as_secs_f64(),
        }
    }

    /// Age threshold as a `Duration`. Negative or non-finite ages read as zero.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_age_secs).unwrap_or(Duration::ZERO)
    }

    /// Check the thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when `max_rows` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_rows == 0 {
            return Err(Error::Configuration(
                "flush policy max_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_rows: Self::default_max_rows(),
            max_age_secs: Self::default_max_age_secs(),
        }
    }
}

/// Reject table names that are unsafe as file or SQL identifiers.
pub(crate) fn check_table_name(table: &str) -> Result<()> {
    let ok = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !table.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "table name '{table}' must be non-empty ASCII alphanumerics, '_', '-' or '.'"
        )))
    }
}

/// [`check_table_name`] reported as a configuration problem, for checks made
/// before any unit runs.
pub(crate) fn require_table_name(table: &str) -> Result<()> {
    check_table_name(table).map_err(|e| match e {
        Error::InvalidInput(reason) => Error::Configuration(reason),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_policy_defaults() {
        let policy: FlushPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, FlushPolicy::default());
        assert_eq!(policy.max_rows, 4096);
        assert_eq!(policy.max_age(), Duration::from_secs(60));
    }

    #[test]
    fn test_flush_policy_rejects_zero_rows() {
        let policy = FlushPolicy::new(0, Duration::from_secs(1));
        assert!(matches!(policy.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_negative_age_is_zero() {
        let policy = FlushPolicy {
            max_rows: 1,
            max_age_secs: -3.0,
        };
        assert_eq!(policy.max_age(), Duration::ZERO);
    }

    #[test]
    fn test_degraded_classification() {
        let err = Error::StorageError("boom".to_string());
        let read = DegradedSink::new(SinkKind::ProjectWarehouse, SinkOp::Read, "t", &err);
        assert!(matches!(read.to_error(), Error::DedupRead { .. }));
        let write = DegradedSink::new(SinkKind::Relational, SinkOp::Write, "t", &err);
        assert!(matches!(write.to_error(), Error::DegradedSink { .. }));
        assert!(!write.to_error().is_fatal());
    }

    #[test]
    fn test_table_names() {
        assert!(check_table_name("phase_2.gauss-800").is_ok());
        assert!(check_table_name("").is_err());
        assert!(check_table_name("../etc").is_err());
        assert!(check_table_name("a b").is_err());
        assert!(matches!(
            require_table_name("phase transition"),
            Err(Error::Configuration(_))
        ));
    }
}
