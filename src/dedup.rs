//! Resume-by-dedup: drop assignments that already have persisted results
//!
//! Existing rows are reduced to value-tuples over a fixed, sorted list of key
//! columns (the exclusion set). Candidates are scanned in order; a candidate
//! whose tuple is absent is kept and its tuple inserted, so exact repeats
//! inside the candidate list collapse to their first occurrence.

use crate::params::ParameterSet;
use crate::record::ResultRecord;
use crate::value::Value;
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

/// Sorted union of the candidates' parameter names.
///
/// These are the only columns needed from the store, so callers request a
/// projection on exactly this list.
#[must_use]
pub fn key_columns(candidates: &[ParameterSet]) -> Vec<String> {
    let keys: BTreeSet<&str> = candidates.iter().flat_map(ParameterSet::keys).collect();
    keys.into_iter().map(str::to_string).collect()
}

/// Set of value-tuples for assignments that must not be computed again.
#[derive(Debug, Default)]
pub struct ExclusionSet {
    keys: Vec<String>,
    seen: FxHashSet<Vec<Value>>,
}

impl ExclusionSet {
    /// Build from existing rows, reading `keys` from each row (missing cells are `Null`).
    #[must_use]
    pub fn from_rows(keys: Vec<String>, rows: &[ResultRecord]) -> Self {
        let mut seen = FxHashSet::default();
        seen.reserve(rows.len());
        for row in rows {
            seen.insert(keys.iter().map(|k| row.get_or_null(k).clone()).collect());
        }
        Self { keys, seen }
    }

    /// Key columns, sorted.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of distinct tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when nothing is excluded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Whether `params` is already excluded.
    #[must_use]
    pub fn contains(&self, params: &ParameterSet) -> bool {
        self.seen.contains(&self.tuple(params))
    }

    /// Insert `params`; returns `true` if it was not already present.
    pub fn insert(&mut self, params: &ParameterSet) -> bool {
        let tuple = self.tuple(params);
        self.seen.insert(tuple)
    }

    fn tuple(&self, params: &ParameterSet) -> Vec<Value> {
        self.keys
            .iter()
            .map(|k| params.get(k).cloned().unwrap_or_default())
            .collect()
    }
}

/// Filter `candidates` against `existing` rows and against themselves.
///
/// `existing` only needs the key columns (see [`key_columns`]). Order of the
/// surviving candidates is preserved. Idempotent for a fixed `existing`.
///
/// ```rust
/// use gridrun::dedup::dedup;
/// use gridrun::params::ParameterSet;
/// use gridrun::record::ResultRecord;
///
/// let existing = vec![ResultRecord::new().with("n", 1).with("k", 10)];
/// let candidates = vec![
///     ParameterSet::new().with("n", 1).with("k", 10),
///     ParameterSet::new().with("n", 1).with("k", 20),
/// ];
/// assert_eq!(dedup(&existing, candidates), vec![ParameterSet::new().with("n", 1).with("k", 20)]);
/// ```
#[must_use]
pub fn dedup(existing: &[ResultRecord], candidates: Vec<ParameterSet>) -> Vec<ParameterSet> {
    if candidates.is_empty() {
        return candidates;
    }
    let mut exclusion = ExclusionSet::from_rows(key_columns(&candidates), existing);
    candidates
        .into_iter()
        .filter(|p| exclusion.insert(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(n: i64, k: i64) -> ParameterSet {
        ParameterSet::new().with("n", n).with("k", k)
    }

    fn row(n: i64, k: i64) -> ResultRecord {
        ResultRecord::new().with("k", k).with("n", n).with("index", 0)
    }

    #[test]
    fn test_dedup_against_existing() {
        let out = dedup(&[row(1, 10)], vec![set(1, 10), set(1, 20)]);
        assert_eq!(out, vec![set(1, 20)]);
    }

    #[test]
    fn test_dedup_within_candidates() {
        let a = ParameterSet::new().with("a", 1);
        assert_eq!(dedup(&[], vec![a.clone(), a.clone()]), vec![a]);
    }

    #[test]
    fn test_dedup_empty_candidates() {
        assert!(dedup(&[row(1, 1)], Vec::new()).is_empty());
    }

    #[test]
    fn test_dedup_preserves_order() {
        let out = dedup(&[row(2, 2)], vec![set(3, 3), set(2, 2), set(1, 1)]);
        assert_eq!(out, vec![set(3, 3), set(1, 1)]);
    }

    #[test]
    fn test_dedup_matches_widened_floats() {
        let existing = vec![ResultRecord::new().with("n", 1.0).with("k", 10.0)];
        assert!(dedup(&existing, vec![set(1, 10)]).is_empty());
    }

    #[test]
    fn test_key_columns_sorted_union() {
        let c = vec![
            ParameterSet::new().with("z", 1).with("a", 1),
            ParameterSet::new().with("m", 1),
        ];
        assert_eq!(key_columns(&c), vec!["a", "m", "z"]);
    }

    #[test]
    fn test_mixed_key_sets_do_not_collide() {
        // {n:1} from one grid vs {n:1, k:2} from another
        let existing = vec![ResultRecord::new().with("n", 1).with("k", 2)];
        let candidates = vec![ParameterSet::new().with("n", 1), set(1, 2)];
        assert_eq!(dedup(&existing, candidates), vec![ParameterSet::new().with("n", 1)]);
    }
}
