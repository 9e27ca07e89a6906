//! Buffered, single-writer result persistence.

use super::{
    require_table_name, DegradedSink, DurableStore, FlushPolicy, RowSink, SinkKind, SinkOp,
    Warehouse,
};
use crate::record::ResultRecord;
use crate::{Error, Result};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Rows written to the durable store (0 for a no-op flush)
    pub rows: usize,
    /// Optional-sink failures tolerated during this flush
    pub degraded: Vec<DegradedSink>,
}

impl FlushReport {
    /// True when every configured sink accepted the batch.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }
}

struct SinkHandles {
    durable: Box<dyn DurableStore>,
    relational: Option<Box<dyn RowSink>>,
    warehouse: Option<Box<dyn Warehouse>>,
}

/// Buffers result rows and flushes them to every configured sink.
///
/// The durable store must accept every batch; a failure there is returned as
/// [`Error::Durability`] and the batch is kept for a retry. The relational
/// sink and the warehouse are best effort: their failures are logged and
/// recorded (see [`ResultSink::degraded`]) and the run continues.
///
/// # Example
///
/// ```rust
/// use gridrun::record::ResultRecord;
/// use gridrun::sink::{FlushPolicy, ParquetStore, ResultSink};
/// use std::time::Duration;
///
/// # fn main() -> gridrun::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let mut sink = ResultSink::builder("demo")
///     .durable(ParquetStore::open(dir.path())?)
///     .flush_policy(FlushPolicy::new(2, Duration::from_secs(60)))
///     .build()?;
///
/// sink.push(ResultRecord::new().with("n", 1))?;
/// assert_eq!(sink.pending(), 1);
/// sink.push(ResultRecord::new().with("n", 2))?;
/// assert_eq!(sink.pending(), 0);
///
/// sink.final_flush()?;
/// assert!(sink.is_closed());
/// # Ok(())
/// # }
/// ```
pub struct ResultSink {
    table: String,
    warehouse_table: String,
    policy: FlushPolicy,
    batch: Vec<ResultRecord>,
    last_flush: Instant,
    next_index: i64,
    handles: Option<SinkHandles>,
    degraded: Vec<DegradedSink>,
    flushes: usize,
}

impl ResultSink {
    /// Start building a sink for `table`.
    #[must_use]
    pub fn builder(table: impl Into<String>) -> ResultSinkBuilder {
        ResultSinkBuilder::new(table)
    }

    /// Destination table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Flush thresholds.
    #[must_use]
    pub const fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    /// Kind of the selected warehouse, if any.
    #[must_use]
    pub fn warehouse_kind(&self) -> Option<SinkKind> {
        self.handles
            .as_ref()
            .and_then(|h| h.warehouse.as_ref())
            .map(|w| w.auth().kind())
    }

    /// Set the `index` stamped on the next pushed row.
    pub fn start_index(&mut self, base: i64) {
        self.next_index = base;
    }

    /// `index` the next pushed row will receive.
    #[must_use]
    pub const fn next_index(&self) -> i64 {
        self.next_index
    }

    /// Rows buffered and not yet flushed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Successful non-empty flushes so far.
    #[must_use]
    pub const fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Every optional-sink failure recorded so far.
    #[must_use]
    pub fn degraded(&self) -> &[DegradedSink] {
        &self.degraded
    }

    /// True after [`final_flush`](Self::final_flush).
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.handles.is_none()
    }

    /// Buffer a row and flush if a threshold tripped.
    ///
    /// # Errors
    /// [`Error::SinkClosed`] after `final_flush`, [`Error::Durability`] if a
    /// triggered flush could not reach the durable store
    pub fn push(&mut self, row: ResultRecord) -> Result<()> {
        self.stage(row)?;
        self.flush_if_due()?;
        Ok(())
    }

    /// Buffer a row without checking thresholds.
    ///
    /// # Errors
    /// [`Error::SinkClosed`] after `final_flush`
    pub fn stage(&mut self, mut row: ResultRecord) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SinkClosed);
        }
        row.stamp_index(self.next_index);
        self.next_index += 1;
        self.batch.push(row);
        Ok(())
    }

    /// Flush when the batch is full or the last flush is older than the age threshold.
    ///
    /// # Errors
    /// Same as [`flush`](Self::flush)
    pub fn flush_if_due(&mut self) -> Result<Option<FlushReport>> {
        if self.is_closed() {
            return Err(Error::SinkClosed);
        }
        if self.batch.is_empty() {
            return Ok(None);
        }
        let full = self.batch.len() >= self.policy.max_rows;
        let stale = self.last_flush.elapsed() > self.policy.max_age();
        if full || stale {
            return self.flush().map(Some);
        }
        Ok(None)
    }

    /// Write the buffered batch to every sink.
    ///
    /// # Errors
    /// [`Error::SinkClosed`] after `final_flush`; [`Error::Durability`] when
    /// the durable store rejects the batch (the batch is retained)
    pub fn flush(&mut self) -> Result<FlushReport> {
        let handles = self.handles.as_mut().ok_or(Error::SinkClosed)?;
        if self.batch.is_empty() {
            return Ok(FlushReport::default());
        }
        let started = Instant::now();

        if let Err(e) = handles.durable.append(&self.table, &self.batch) {
            error!(table = %self.table, rows = self.batch.len(), error = %e, "durable store write failed");
            return Err(Error::Durability {
                table: self.table.clone(),
                reason: e.to_string(),
            });
        }

        let mut degraded = Vec::new();
        if let Some(relational) = handles.relational.as_mut() {
            if let Err(e) = relational.append(&self.table, &self.batch) {
                degraded.push(DegradedSink::new(SinkKind::Relational, SinkOp::Write, &self.table, &e));
            }
        }
        if let Some(warehouse) = handles.warehouse.as_mut() {
            if let Err(e) = warehouse.append(&self.warehouse_table, &self.batch) {
                let kind = warehouse.auth().kind();
                degraded.push(DegradedSink::new(kind, SinkOp::Write, &self.warehouse_table, &e));
            }
        }
        for event in &degraded {
            error!(sink = %event.kind, table = %event.table, reason = %event.reason, "optional sink write failed, continuing");
        }

        let rows = self.batch.len();
        self.batch.clear();
        self.last_flush = Instant::now();
        self.flushes += 1;
        self.degraded.extend(degraded.iter().cloned());
        debug!(
            table = %self.table,
            rows,
            flush = self.flushes,
            elapsed_ms = started.elapsed().as_millis(),
            "flushed batch"
        );
        Ok(FlushReport { rows, degraded })
    }

    /// Flush what is left and release every sink handle.
    ///
    /// An empty batch performs no writes. Close failures are recorded as
    /// degraded events. Any later call returns [`Error::SinkClosed`].
    ///
    /// # Errors
    /// [`Error::SinkClosed`] if already finalized; [`Error::Durability`] from
    /// the last flush, in which case the sink stays open
    pub fn final_flush(&mut self) -> Result<FlushReport> {
        let mut report = self.flush()?;
        let Some(mut handles) = self.handles.take() else {
            return Err(Error::SinkClosed);
        };

        let mut closed = Vec::new();
        if let Err(e) = handles.durable.close() {
            closed.push(DegradedSink::new(SinkKind::Durable, SinkOp::Close, &self.table, &e));
        }
        if let Some(relational) = handles.relational.as_mut() {
            if let Err(e) = relational.close() {
                closed.push(DegradedSink::new(SinkKind::Relational, SinkOp::Close, &self.table, &e));
            }
        }
        if let Some(warehouse) = handles.warehouse.as_mut() {
            if let Err(e) = warehouse.close() {
                let kind = warehouse.auth().kind();
                closed.push(DegradedSink::new(kind, SinkOp::Close, &self.warehouse_table, &e));
            }
        }
        for event in &closed {
            error!(sink = %event.kind, reason = %event.reason, "sink close failed");
        }
        self.degraded.extend(closed.iter().cloned());
        report.degraded.extend(closed);

        info!(
            table = %self.table,
            flushes = self.flushes,
            degraded = self.degraded.len(),
            "result sink closed"
        );
        Ok(report)
    }

    /// Every persisted row of the table.
    ///
    /// # Errors
    /// [`Error::SinkClosed`] after `final_flush`. Read failures are degraded,
    /// not returned.
    pub fn read_all(&mut self) -> Result<Vec<ResultRecord>> {
        self.read_projection(&[])
    }

    /// Persisted rows restricted to `keys` (all columns when empty).
    ///
    /// Reads the selected warehouse when one is configured, else the durable
    /// store. A missing table reads as no rows. A failed read is logged,
    /// recorded as a degraded [`SinkOp::Read`] event, and reads as no rows.
    ///
    /// # Errors
    /// [`Error::SinkClosed`] after `final_flush`
    pub fn read_projection(&mut self, keys: &[String]) -> Result<Vec<ResultRecord>> {
        let handles = self.handles.as_ref().ok_or(Error::SinkClosed)?;
        let (kind, table, outcome) = match handles.warehouse.as_ref() {
            Some(warehouse) => (
                warehouse.auth().kind(),
                self.warehouse_table.as_str(),
                warehouse.select(&self.warehouse_table, keys),
            ),
            None => (
                SinkKind::Durable,
                self.table.as_str(),
                handles.durable.select(&self.table, keys),
            ),
        };

        match outcome {
            Ok(Some(rows)) => {
                debug!(sink = %kind, table, rows = rows.len(), columns = keys.len(), "read existing rows");
                Ok(rows)
            }
            Ok(None) => {
                debug!(sink = %kind, table, "table does not exist yet");
                Ok(Vec::new())
            }
            Err(e) => {
                let event = DegradedSink::new(kind, SinkOp::Read, table, &e);
                error!(sink = %kind, table, reason = %event.reason, "dedup read failed, treating as empty");
                self.degraded.push(event);
                Ok(Vec::new())
            }
        }
    }
}

impl Drop for ResultSink {
    fn drop(&mut self) {
        if !self.batch.is_empty() {
            warn!(table = %self.table, rows = self.batch.len(), "result sink dropped with unflushed rows");
        }
    }
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink")
            .field("table", &self.table)
            .field("policy", &self.policy)
            .field("pending", &self.batch.len())
            .field("next_index", &self.next_index)
            .field("warehouse", &self.warehouse_kind())
            .field("flushes", &self.flushes)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResultSink`].
///
/// Sink handles are constructed by the caller (paths, connections,
/// credentials) and moved in.
pub struct ResultSinkBuilder {
    table: String,
    dataset: Option<String>,
    durable: Option<Box<dyn DurableStore>>,
    relational: Option<Box<dyn RowSink>>,
    credential_warehouse: Option<Box<dyn Warehouse>>,
    project_warehouse: Option<Box<dyn Warehouse>>,
    policy: FlushPolicy,
}

impl ResultSinkBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            dataset: None,
            durable: None,
            relational: None,
            credential_warehouse: None,
            project_warehouse: None,
            policy: FlushPolicy::default(),
        }
    }

    /// Required durable store.
    #[must_use]
    pub fn durable(mut self, store: impl DurableStore + 'static) -> Self {
        self.durable = Some(Box::new(store));
        self
    }

    /// Optional relational sink.
    #[must_use]
    pub fn relational(mut self, sink: impl RowSink + 'static) -> Self {
        self.relational = Some(Box::new(sink));
        self
    }

    /// Optional warehouse, slotted by its auth mode. When both a
    /// credential-based and a project-id-based warehouse are given, only the
    /// credential-based one is used.
    #[must_use]
    pub fn warehouse(mut self, warehouse: impl Warehouse + 'static) -> Self {
        match warehouse.auth().kind() {
            SinkKind::CredentialWarehouse => self.credential_warehouse = Some(Box::new(warehouse)),
            _ => self.project_warehouse = Some(Box::new(warehouse)),
        }
        self
    }

    /// Warehouse dataset; warehouse tables are named `<dataset>.<table>`.
    #[must_use]
    pub fn dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    /// Flush thresholds.
    #[must_use]
    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the sink.
    ///
    /// # Errors
    /// [`Error::Configuration`] when the table name is empty, no durable
    /// store was given, or the flush policy is invalid
    pub fn build(self) -> Result<ResultSink> {
        if self.table.trim().is_empty() {
            return Err(Error::Configuration("result sink needs a table name".to_string()));
        }
        let durable = self.durable.ok_or_else(|| {
            Error::Configuration(format!(
                "result sink for '{}' needs a durable store",
                self.table
            ))
        })?;
        self.policy.validate()?;
        require_table_name(&self.table)?;

        let warehouse = match (self.credential_warehouse, self.project_warehouse) {
            (Some(credential), Some(_)) => {
                debug!(table = %self.table, "credential warehouse configured, ignoring project-id warehouse");
                Some(credential)
            }
            (credential, project) => credential.or(project),
        };
        let warehouse_table = match &self.dataset {
            Some(dataset) => format!("{dataset}.{}", self.table),
            None => self.table.clone(),
        };
        if warehouse.is_some() {
            require_table_name(&warehouse_table)?;
        }

        info!(
            table = %self.table,
            relational = self.relational.is_some(),
            warehouse = ?warehouse.as_ref().map(|w| w.auth().kind()),
            max_rows = self.policy.max_rows,
            max_age_secs = self.policy.max_age_secs,
            "result sink ready"
        );

        Ok(ResultSink {
            table: self.table,
            warehouse_table,
            policy: self.policy,
            batch: Vec::new(),
            last_flush: Instant::now(),
            next_index: 0,
            handles: Some(SinkHandles {
                durable,
                relational: self.relational,
                warehouse,
            }),
            degraded: Vec::new(),
            flushes: 0,
        })
    }
}
