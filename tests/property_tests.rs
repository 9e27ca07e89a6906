//! Property-based tests for grid expansion, stop lists and dedup
//!
//! - Test counting invariants of the Cartesian product
//! - Test dedup idempotence and stop-list multiset semantics
//! - Run with ProptestConfig::with_cases(100)

use gridrun::dedup::dedup;
use gridrun::params::{remove_stop_list, unroll, ParameterGrid, ParameterSet};
use gridrun::record::ResultRecord;
use gridrun::sink::{batch_to_rows, rows_to_batch};
use gridrun::Value;
use proptest::prelude::*;
use std::collections::BTreeSet;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// One grid cell of any kind a spec document can hold
fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..5).prop_map(Value::Int),
        (0i32..5).prop_map(|i| Value::Float(f64::from(i) + 0.5)),
        any::<bool>().prop_map(Value::Bool),
        "[a-c]{0,2}".prop_map(Value::Str),
        Just(Value::Null),
    ]
}

/// Grid with 1-4 distinctly named axes of 0-4 values each, types mixed freely
fn arb_grid() -> impl Strategy<Value = ParameterGrid> {
    prop::collection::vec(prop::collection::vec(arb_value(), 0..5), 1..5).prop_map(|axes| {
        axes.into_iter()
            .enumerate()
            .fold(ParameterGrid::new(), |grid, (i, values)| {
                grid.axis(format!("p{i}"), values)
            })
    })
}

/// Assignments over a fixed two-key schema, with repeats likely
fn arb_sets(max: usize) -> impl Strategy<Value = Vec<ParameterSet>> {
    prop::collection::vec((0i64..3, 0i64..3), 0..max).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(a, b)| ParameterSet::new().with("a", a).with("b", b))
            .collect()
    })
}

fn as_rows(sets: &[ParameterSet]) -> Vec<ResultRecord> {
    sets.iter().map(ResultRecord::from_params).collect()
}

fn count(sets: &[ParameterSet], needle: &ParameterSet) -> usize {
    sets.iter().filter(|s| *s == needle).count()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: unrolled count is the product of the axis lengths
    #[test]
    fn prop_unroll_count_is_product(grid in arb_grid()) {
        let expected: usize = grid.axes().map(|(_, values)| values.len()).product();
        prop_assert_eq!(unroll(&grid).len(), expected);
        prop_assert_eq!(grid.cardinality(), expected);
    }

    /// Property: every assignment binds exactly the grid's keys
    #[test]
    fn prop_unroll_key_sets(grid in arb_grid()) {
        let keys: BTreeSet<&str> = grid.axes().map(|(name, _)| name).collect();
        for set in unroll(&grid) {
            let got: BTreeSet<&str> = set.keys().collect();
            prop_assert_eq!(&got, &keys);
        }
    }

    /// Property: each assignment takes its values from the matching axis
    #[test]
    fn prop_unroll_values_come_from_axes(grid in arb_grid()) {
        for set in unroll(&grid) {
            for (name, values) in grid.axes() {
                let bound = set.get(name).cloned().unwrap_or(Value::Null);
                prop_assert!(values.contains(&bound));
            }
        }
    }

    /// Property: a stored sweep read back through Arrow excludes every candidate
    #[test]
    fn prop_stored_rows_exclude_their_assignments(grid in arb_grid()) {
        let candidates = unroll(&grid);
        prop_assume!(!candidates.is_empty());
        let batch = rows_to_batch(&as_rows(&candidates)).unwrap();
        let stored = batch_to_rows(&batch).unwrap();
        prop_assert!(dedup(&stored, candidates).is_empty());
    }

    /// Property: dedup is idempotent for fixed existing rows
    #[test]
    fn prop_dedup_idempotent(existing in arb_sets(8), candidates in arb_sets(12)) {
        let rows = as_rows(&existing);
        let once = dedup(&rows, candidates);
        let twice = dedup(&rows, once.clone());
        prop_assert_eq!(once, twice);
    }

    /// Property: dedup output is disjoint from existing and free of repeats
    #[test]
    fn prop_dedup_disjoint_and_unique(existing in arb_sets(8), candidates in arb_sets(12)) {
        let out = dedup(&as_rows(&existing), candidates);
        for (i, set) in out.iter().enumerate() {
            prop_assert!(!existing.contains(set));
            prop_assert!(!out[..i].contains(set));
        }
    }

    /// Property: stop list removes min(count in input, count in stop list) of each entry
    #[test]
    fn prop_stop_list_removes_min_count(assignments in arb_sets(12), stop in arb_sets(6)) {
        let out = remove_stop_list(assignments.clone(), &stop);
        let distinct: Vec<&ParameterSet> = assignments.iter().chain(stop.iter()).collect();
        for needle in distinct {
            let before = count(&assignments, needle);
            let removed = before.min(count(&stop, needle));
            prop_assert_eq!(count(&out, needle), before - removed);
        }
    }
}

#[test]
fn test_empty_grid_unrolls_to_nothing() {
    assert!(unroll(&ParameterGrid::new()).is_empty());
}

#[test]
fn test_dedup_collapses_repeats() {
    let a = ParameterSet::new().with("a", 1);
    assert_eq!(dedup(&[], vec![a.clone(), a.clone()]), vec![a]);
}
