//! Parameter grids, parameter sets and experiment specs
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentSpec ──< ParameterGrid (1 or N, "multi_res")
//!       │                 │ unroll (Cartesian product, first key slowest)
//!       │                 v
//!       └── stop_list ──> ParameterSet (N)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use gridrun::params::{unroll, ParameterGrid};
//!
//! let grid = ParameterGrid::new()
//!     .axis("n", [1, 2])
//!     .axis("k", [10, 20]);
//!
//! let sets = unroll(&grid);
//! assert_eq!(sets.len(), 4);
//! assert_eq!(sets[1].get("k").and_then(|v| v.as_i64()), Some(20));
//! ```

mod spec;
mod unroll;

pub use spec::{ExperimentSpec, ParameterSource};
pub use unroll::{remove_stop_list, unroll, unroll_experiment};

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Named sweep axes, each an ordered list of candidate values.
///
/// Axis order is significant: the first axis varies slowest when unrolled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterGrid(IndexMap<String, Vec<Value>>);

impl ParameterGrid {
    /// Create an empty grid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append (or replace) an axis, returning the grid.
    #[must_use]
    pub fn axis<V, I>(mut self, name: impl Into<String>, values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        self.insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Append (or replace) an axis.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Value>) {
        self.0.insert(name.into(), values);
    }

    /// Number of axes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the grid has no axes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Axes in declaration order.
    pub fn axes(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of assignments this grid unrolls to (0 for an empty grid).
    #[must_use]
    pub fn cardinality(&self) -> usize {
        if self.0.is_empty() {
            return 0;
        }
        self.0.values().map(Vec::len).product()
    }
}

/// One resolved point in a sweep: every grid axis bound to one value.
///
/// Equality ignores key order: two sets are equal iff their key sets match
/// and every key maps to an equal value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(IndexMap<String, Value>);

impl ParameterSet {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value`, returning the set.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub(crate) fn bind(&mut self, name: &str, value: Value) {
        self.0.insert(name.to_string(), value);
    }

    /// Value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Number of bound parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameter names in binding order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `(name, value)` pairs in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Same key set as `other`, regardless of order.
    #[must_use]
    pub fn same_keys(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.keys().all(|k| other.0.contains_key(k))
    }

    /// Canonical form: pairs sorted by key. Equal sets have equal canonical forms.
    #[must_use]
    pub fn canonical(&self) -> Vec<(&str, &Value)> {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        pairs
    }
}

impl Hash for ParameterSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Order-independent, to agree with IndexMap equality
        self.canonical().hash(state);
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
