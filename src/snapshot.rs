//! Spec snapshots: a copy of the experiment document next to its results.

use crate::params::ExperimentSpec;
use crate::Result;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Records the spec a run was started with.
pub trait SpecSnapshot: Send {
    /// Persist `spec`, returning where it went.
    ///
    /// # Errors
    /// Any I/O or serialization failure. Callers log it and carry on.
    fn record(&self, spec: &ExperimentSpec) -> Result<PathBuf>;
}

/// Writes `<dir>/<table_name>-<unix_ts>.json`, indented by four spaces.
#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    dir: PathBuf,
}

impl JsonSnapshot {
    /// Snapshots go into `dir` (created on first use).
    #[must_use]
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SpecSnapshot for JsonSnapshot {
    fn record(&self, spec: &ExperimentSpec) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let ts = chrono::Utc::now().timestamp();
        let path = self.dir.join(format!("{}-{ts}.json", spec.table_name()));

        let mut out = BufWriter::new(File::create(&path)?);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        spec.serialize(&mut ser)?;
        out.flush()?;
        Ok(path)
    }
}
