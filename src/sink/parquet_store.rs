//! Durable store (Arrow/Parquet)
//!
//! **Append-Only Design**:
//! - One directory per table, one immutable Parquet part file per flush
//! - Write pattern: whole batches only, no row updates
//! - Part files are written under a temporary name and renamed into place,
//!   so a crash mid-write never leaves a half-written part visible
//!
//! Reads push the column projection down into the Parquet reader; columns a
//! part file does not have read as `Null`.

use super::convert::{batch_to_rows, rows_to_batch};
use super::{check_table_name, RowSink, RowSource};
use crate::record::ResultRecord;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".parquet";

/// Parquet-backed durable store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            Error::StorageError(format!("Failed to create store at {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf> {
        check_table_name(table)?;
        Ok(self.root.join(table))
    }

    /// Part files of `table`, oldest first. Empty if the table does not exist.
    ///
    /// # Errors
    /// Returns error if the table directory cannot be listed
    pub fn part_files(&self, table: &str) -> Result<Vec<PathBuf>> {
        let dir = self.table_dir(table)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut parts = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_part = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                n.starts_with(PART_PREFIX) && n.ends_with(PART_SUFFIX)
            });
            if is_part {
                parts.push(path);
            }
        }
        // Zero-padded sequence numbers sort lexically
        parts.sort();
        Ok(parts)
    }

    /// Append one batch as a new part file.
    ///
    /// # Errors
    /// Returns error if the batch cannot be encoded or the file cannot be written
    pub fn append_batch(&self, table: &str, batch: &RecordBatch) -> Result<PathBuf> {
        let dir = self.table_dir(table)?;
        fs::create_dir_all(&dir)?;
        let seq = self
            .part_files(table)?
            .iter()
            .filter_map(|p| part_sequence(p))
            .max()
            .map_or(0, |last| last + 1);
        let name = format!("{PART_PREFIX}{seq:06}{PART_SUFFIX}");
        let final_path = dir.join(&name);
        if final_path.exists() {
            return Err(Error::StorageError(format!(
                "part file {} already exists",
                final_path.display()
            )));
        }
        let tmp_path = dir.join(format!(".{name}.tmp"));

        let file = File::create(&tmp_path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
        writer.write(batch)?;
        writer.close()?;
        fs::rename(&tmp_path, &final_path)?;

        debug!(table, rows = batch.num_rows(), part = %final_path.display(), "wrote part file");
        Ok(final_path)
    }

    /// Load every batch of `table`, optionally restricted to `columns`.
    ///
    /// Columns missing from a part are simply absent from that part's batches.
    ///
    /// # Errors
    /// Returns error if a part file cannot be read or parsed
    pub fn load_batches(&self, table: &str, columns: &[String]) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        for part in self.part_files(table)? {
            let file = File::open(&part).map_err(|e| {
                Error::StorageError(format!("Failed to open Parquet file {}: {e}", part.display()))
            })?;
            let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
            if !columns.is_empty() {
                let indices: Vec<usize> = columns
                    .iter()
                    .filter_map(|c| builder.schema().index_of(c).ok())
                    .collect();
                let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
                builder = builder.with_projection(mask);
            }
            for batch in builder.build()? {
                batches.push(batch?);
            }
        }
        Ok(batches)
    }
}

/// Sequence number encoded in a part file name.
fn part_sequence(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(PART_PREFIX)?
        .strip_suffix(PART_SUFFIX)?
        .parse()
        .ok()
}

impl RowSink for ParquetStore {
    fn append(&mut self, table: &str, rows: &[ResultRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let batch = rows_to_batch(rows)?;
        self.append_batch(table, &batch)?;
        Ok(())
    }
}

impl RowSource for ParquetStore {
    fn select(&self, table: &str, columns: &[String]) -> Result<Option<Vec<ResultRecord>>> {
        if !self.table_dir(table)?.is_dir() {
            return Ok(None);
        }
        let mut rows = Vec::new();
        for batch in self.load_batches(table, columns)? {
            let batch_rows = batch_to_rows(&batch)?;
            if columns.is_empty() {
                rows.extend(batch_rows);
            } else {
                rows.extend(batch_rows.iter().map(|r| r.project(columns)));
            }
        }
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn rows(range: std::ops::Range<i64>) -> Vec<ResultRecord> {
        range
            .map(|i| ResultRecord::new().with("index", i).with("n", i * 10).with("err", 0.5))
            .collect()
    }

    #[test]
    fn test_append_creates_one_part_per_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::open(dir.path()).unwrap();

        store.append("t", &rows(0..3)).unwrap();
        store.append("t", &rows(3..5)).unwrap();

        assert_eq!(store.part_files("t").unwrap().len(), 2);
        let all = store.select("t", &[]).unwrap().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[4].get("n"), Some(&Value::Int(40)));
    }

    #[test]
    fn test_sequence_continues_after_highest_part() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::open(dir.path()).unwrap();
        for start in [0, 1, 2] {
            store.append("t", &rows(start..start + 1)).unwrap();
        }
        let parts = store.part_files("t").unwrap();
        fs::remove_file(&parts[1]).unwrap();

        store.append("t", &rows(3..4)).unwrap();
        let names: Vec<_> = store
            .part_files("t")
            .unwrap()
            .iter()
            .filter_map(|p| part_sequence(p))
            .collect();
        assert_eq!(names, vec![0, 2, 3]);
        let indices: Vec<_> = store
            .select("t", &["index".to_string()])
            .unwrap()
            .unwrap()
            .iter()
            .filter_map(|r| r.get("index").and_then(Value::as_i64))
            .collect();
        assert_eq!(indices, vec![0, 2, 3]);
    }

    #[test]
    fn test_missing_table_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path()).unwrap();
        assert!(store.select("nope", &[]).unwrap().is_none());
    }

    #[test]
    fn test_projection_and_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::open(dir.path()).unwrap();
        store.append("t", &rows(0..2)).unwrap();
        store
            .append("t", &[ResultRecord::new().with("index", 2).with("extra", "x")])
            .unwrap();

        let cols = vec!["n".to_string(), "extra".to_string()];
        let projected = store.select("t", &cols).unwrap().unwrap();
        assert_eq!(projected.len(), 3);
        assert_eq!(projected[0].len(), 2);
        assert!(projected[0].get_or_null("extra").is_null());
        assert!(projected[2].get_or_null("n").is_null());
        assert_eq!(projected[2].get("extra"), Some(&Value::from("x")));
    }

    #[test]
    fn test_empty_append_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::open(dir.path()).unwrap();
        store.append("t", &[]).unwrap();
        assert!(store.part_files("t").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_table_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.append("../escape", &rows(0..1)),
            Err(Error::InvalidInput(_))
        ));
    }
}
