//! Warehouse sink seam and an in-memory implementation using `DashMap`.
//!
//! A real warehouse client lives outside this crate; callers construct it with
//! their own credentials and hand it to [`ResultSinkBuilder`](super::ResultSinkBuilder).

use super::{check_table_name, RowSink, RowSource, SinkKind};
use crate::record::ResultRecord;
use crate::Result;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// How a warehouse client authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseAuth {
    /// Service-account key file
    ServiceAccount {
        /// Path to the key file
        key_path: PathBuf,
    },
    /// Ambient credentials scoped by project id
    ProjectId(String),
}

impl WarehouseAuth {
    /// Sink kind this auth mode maps to.
    #[must_use]
    pub const fn kind(&self) -> SinkKind {
        match self {
            Self::ServiceAccount { .. } => SinkKind::CredentialWarehouse,
            Self::ProjectId(_) => SinkKind::ProjectWarehouse,
        }
    }
}

/// Optional analytic warehouse. Also serves dedup reads when configured.
pub trait Warehouse: RowSink + RowSource {
    /// Authentication mode of this client.
    fn auth(&self) -> &WarehouseAuth;
}

/// In-memory warehouse.
///
/// Clones share the same tables, so a test can keep one handle and give
/// another to a [`ResultSink`](super::ResultSink).
///
/// # Example
///
/// ```rust
/// use gridrun::record::ResultRecord;
/// use gridrun::sink::{MemoryWarehouse, RowSink, RowSource, WarehouseAuth};
///
/// let mut wh = MemoryWarehouse::new(WarehouseAuth::ProjectId("demo".into()));
/// wh.append("runs", &[ResultRecord::new().with("n", 1)]).unwrap();
/// assert_eq!(wh.len("runs"), 1);
/// assert!(wh.select("missing", &[]).unwrap().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryWarehouse {
    tables: Arc<DashMap<String, Vec<ResultRecord>>>,
    auth: WarehouseAuth,
}

impl MemoryWarehouse {
    /// Create an empty warehouse.
    #[must_use]
    pub fn new(auth: WarehouseAuth) -> Self {
        Self {
            tables: Arc::new(DashMap::new()),
            auth,
        }
    }

    /// Rows stored in `table` (0 when absent).
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |rows| rows.len())
    }

    /// Check if no table holds any rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.value().is_empty())
    }

    /// Table names, sorted.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Drop every table.
    pub fn clear(&self) {
        self.tables.clear();
    }
}

impl RowSink for MemoryWarehouse {
    fn append(&mut self, table: &str, rows: &[ResultRecord]) -> Result<()> {
        check_table_name(table)?;
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(())
    }
}

impl RowSource for MemoryWarehouse {
    fn select(&self, table: &str, columns: &[String]) -> Result<Option<Vec<ResultRecord>>> {
        check_table_name(table)?;
        Ok(self.tables.get(table).map(|rows| {
            if columns.is_empty() {
                rows.clone()
            } else {
                rows.iter().map(|r| r.project(columns)).collect()
            }
        }))
    }
}

impl Warehouse for MemoryWarehouse {
    fn auth(&self) -> &WarehouseAuth {
        &self.auth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_clones_share_tables() {
        let wh = MemoryWarehouse::new(WarehouseAuth::ProjectId("p".into()));
        let mut writer = wh.clone();
        writer
            .append("t", &[ResultRecord::new().with("a", 1).with("b", 2)])
            .unwrap();
        assert_eq!(wh.len("t"), 1);
        assert_eq!(wh.tables(), vec!["t"]);
        assert!(!wh.is_empty());

        let rows = wh.select("t", &["b".to_string()]).unwrap().unwrap();
        assert_eq!(rows[0].get("b"), Some(&Value::Int(2)));
        assert!(rows[0].get("a").is_none());

        wh.clear();
        assert!(wh.is_empty());
    }

    #[test]
    fn test_auth_kind() {
        let sa = WarehouseAuth::ServiceAccount {
            key_path: PathBuf::from("key.json"),
        };
        assert_eq!(sa.kind(), SinkKind::CredentialWarehouse);
        assert_eq!(
            WarehouseAuth::ProjectId("p".into()).kind(),
            SinkKind::ProjectWarehouse
        );
    }
}
