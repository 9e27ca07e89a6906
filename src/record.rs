//! Result Record - one persisted row

use crate::params::ParameterSet;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Name of the synthetic audit column stamped by [`ResultSink`](crate::sink::ResultSink).
pub const INDEX_COLUMN: &str = "index";

/// One result row: identifying parameter columns plus computed outputs.
///
/// The schema belongs to the computation; nothing is fixed in advance.
/// Column order is preserved for storage and export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord(IndexMap<String, Value>);

impl ResultRecord {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Row seeded with the parameter columns of `params`.
    #[must_use]
    pub fn from_params(params: &ParameterSet) -> Self {
        Self(
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    /// Set a column, returning the row.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column. An existing column keeps its position.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    /// Set the audit column, moving it to the front.
    pub(crate) fn stamp_index(&mut self, index: i64) {
        self.0.shift_remove(INDEX_COLUMN);
        self.0.shift_insert(0, INDEX_COLUMN.to_string(), Value::Int(index));
    }

    /// Remove a column, keeping the order of the others.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.shift_remove(column)
    }

    /// Cell value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Cell value, `Null` when the column is absent.
    #[must_use]
    pub fn get_or_null(&self, column: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.0.get(column).unwrap_or(NULL)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only `columns`, in the given order; absent columns become `Null`.
    #[must_use]
    pub fn project(&self, columns: &[String]) -> Self {
        Self(
            columns
                .iter()
                .map(|c| (c.clone(), self.get_or_null(c).clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ResultRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for ResultRecord {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Union of the columns of `rows`, in first-seen order.
#[must_use]
pub fn column_union(rows: &[ResultRecord]) -> Vec<String> {
    let mut seen: IndexMap<&str, ()> = IndexMap::new();
    for row in rows {
        for column in row.columns() {
            seen.entry(column).or_insert(());
        }
    }
    seen.into_keys().map(str::to_string).collect()
}
