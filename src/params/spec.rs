//! Experiment spec - the declarative document a run starts from

use super::{ParameterGrid, ParameterSet};
use crate::sink::require_table_name;
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Declarative sweep description.
///
/// JSON form:
///
/// ```json
/// {
///     "table_name": "phase_transition_gaussian",
///     "parameters": { "n": [100, 200], "k": [1, 2, 3] },
///     "stop_list": [ { "n": 100, "k": 1 } ]
/// }
/// ```
///
/// `multi_res` (a list of grids whose expansions are concatenated) replaces
/// `parameters`; the two are mutually exclusive. Fields the crate does not
/// know are kept so that a snapshot reproduces the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    #[serde(default)]
    table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<ParameterGrid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    multi_res: Option<Vec<ParameterGrid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stop_list: Option<Vec<ParameterSet>>,
    #[serde(flatten)]
    extra: IndexMap<String, serde_json::Value>,
}

/// Where a spec's assignments come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource<'a> {
    /// A single grid
    Single(&'a ParameterGrid),
    /// Independent sub-sweeps, concatenated in order
    Multi(&'a [ParameterGrid]),
}

impl ExperimentSpec {
    /// Spec over a single grid.
    #[must_use]
    pub fn new(table_name: impl Into<String>, parameters: ParameterGrid) -> Self {
        Self {
            table_name: table_name.into(),
            parameters: Some(parameters),
            multi_res: None,
            stop_list: None,
            extra: IndexMap::new(),
        }
    }

    /// Spec over several grids ("multi-resolution" sweep).
    #[must_use]
    pub fn multi(table_name: impl Into<String>, grids: Vec<ParameterGrid>) -> Self {
        Self {
            table_name: table_name.into(),
            parameters: None,
            multi_res: Some(grids),
            stop_list: None,
            extra: IndexMap::new(),
        }
    }

    /// Attach a stop list.
    #[must_use]
    pub fn with_stop_list(mut self, stop_list: Vec<ParameterSet>) -> Self {
        self.stop_list = Some(stop_list);
        self
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed JSON and
    /// [`Error::Configuration`] when validation fails.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Read, parse and validate a JSON document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`ExperimentSpec::from_json_str`].
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check that the spec names a table and exactly one parameter source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(Error::Configuration(
                "experiment spec is missing 'table_name'".to_string(),
            ));
        }
        require_table_name(&self.table_name)?;
        match (&self.parameters, &self.multi_res) {
            (None, None) => Err(Error::Configuration(format!(
                "experiment '{}' has neither 'parameters' nor 'multi_res'",
                self.table_name
            ))),
            (Some(_), Some(_)) => Err(Error::Configuration(format!(
                "experiment '{}' sets both 'parameters' and 'multi_res'",
                self.table_name
            ))),
            _ => Ok(()),
        }
    }

    /// Destination table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Parameter source. A spec with no source reads as an empty multi-sweep;
    /// [`ExperimentSpec::validate`] rejects that case.
    #[must_use]
    pub fn source(&self) -> ParameterSource<'_> {
        match (&self.multi_res, &self.parameters) {
            (Some(grids), _) => ParameterSource::Multi(grids),
            (None, Some(grid)) => ParameterSource::Single(grid),
            (None, None) => ParameterSource::Multi(&[]),
        }
    }

    /// Stop list, if any.
    #[must_use]
    pub fn stop_list(&self) -> Option<&[ParameterSet]> {
        self.stop_list.as_deref()
    }

    /// Document fields not interpreted by gridrun.
    #[must_use]
    pub const fn extra(&self) -> &IndexMap<String, serde_json::Value> {
        &self.extra
    }

    /// Upper bound on assignments before stop list and dedup.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        match self.source() {
            ParameterSource::Single(grid) => grid.cardinality(),
            ParameterSource::Multi(grids) => grids.iter().map(ParameterGrid::cardinality).sum(),
        }
    }
}
