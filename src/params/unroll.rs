//! Grid expansion and stop-list exclusion

use super::{ExperimentSpec, ParameterGrid, ParameterSet, ParameterSource};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Expand a grid into its Cartesian product.
///
/// The first axis varies slowest, the last fastest. An empty grid yields no
/// assignments (not one empty assignment), as does any axis with no values.
///
/// ```rust
/// use gridrun::params::{unroll, ParameterGrid, ParameterSet};
///
/// let grid = ParameterGrid::new().axis("n", [1, 2]).axis("k", [10, 20]);
/// let expected: Vec<ParameterSet> = vec![
///     ParameterSet::new().with("n", 1).with("k", 10),
///     ParameterSet::new().with("n", 1).with("k", 20),
///     ParameterSet::new().with("n", 2).with("k", 10),
///     ParameterSet::new().with("n", 2).with("k", 20),
/// ];
/// assert_eq!(unroll(&grid), expected);
/// ```
#[must_use]
pub fn unroll(grid: &ParameterGrid) -> Vec<ParameterSet> {
    let mut outputs = Vec::with_capacity(grid.cardinality());
    if grid.is_empty() {
        return outputs;
    }
    let axes: Vec<_> = grid.axes().collect();
    expand(&axes, 0, &mut ParameterSet::new(), &mut outputs);
    outputs
}

fn expand(
    axes: &[(&str, &[crate::Value])],
    idx: usize,
    current: &mut ParameterSet,
    outputs: &mut Vec<ParameterSet>,
) {
    if idx == axes.len() {
        outputs.push(current.clone());
        return;
    }
    let (name, values) = axes[idx];
    for value in values {
        current.bind(name, value.clone());
        expand(axes, idx + 1, current, outputs);
    }
}

/// Unroll every grid of a spec and apply its stop list.
///
/// Multi-resolution grids are independent sub-sweeps: their expansions are
/// concatenated in declaration order, never combined with each other.
#[must_use]
pub fn unroll_experiment(spec: &ExperimentSpec) -> Vec<ParameterSet> {
    let unrolled = match spec.source() {
        ParameterSource::Single(grid) => unroll(grid),
        ParameterSource::Multi(grids) => {
            let mut all = Vec::with_capacity(spec.cardinality());
            for grid in grids {
                all.extend(unroll(grid));
            }
            all
        }
    };
    match spec.stop_list() {
        Some(stop) if !stop.is_empty() => {
            let before = unrolled.len();
            let kept = remove_stop_list(unrolled, stop);
            debug!(
                table = spec.table_name(),
                removed = before - kept.len(),
                "applied stop list"
            );
            kept
        }
        _ => unrolled,
    }
}

/// Drop assignments that appear in the stop multiset.
///
/// Each stop entry removes at most one matching assignment, so `k` copies of
/// an entry remove at most `k` generated copies. A stop entry only matches an
/// assignment with exactly the same key set. Survivors keep their order.
#[must_use]
pub fn remove_stop_list(assignments: Vec<ParameterSet>, stop: &[ParameterSet]) -> Vec<ParameterSet> {
    let mut remaining: FxHashMap<&ParameterSet, usize> = FxHashMap::default();
    for entry in stop {
        *remaining.entry(entry).or_insert(0) += 1;
    }

    let mut result = Vec::with_capacity(assignments.len());
    for param in assignments {
        let hit = match remaining.get_mut(&param) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        };
        if !hit {
            result.push(param);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(n: i64, k: i64) -> ParameterSet {
        ParameterSet::new().with("n", n).with("k", k)
    }

    #[test]
    fn test_unroll_first_axis_slowest() {
        let grid = ParameterGrid::new().axis("n", [1, 2]).axis("k", [10, 20]);
        assert_eq!(unroll(&grid), vec![set(1, 10), set(1, 20), set(2, 10), set(2, 20)]);
    }

    #[test]
    fn test_unroll_empty_grid() {
        assert!(unroll(&ParameterGrid::new()).is_empty());
    }

    #[test]
    fn test_unroll_empty_axis() {
        let grid = ParameterGrid::new().axis("n", [1, 2]).axis("k", Vec::<i64>::new());
        assert!(unroll(&grid).is_empty());
    }

    #[test]
    fn test_unroll_keeps_axis_order_in_sets() {
        let grid = ParameterGrid::new().axis("z", [1]).axis("a", ["x"]);
        let sets = unroll(&grid);
        let keys: Vec<_> = sets[0].keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_multi_res_concatenates() {
        let spec = ExperimentSpec::multi(
            "t",
            vec![
                ParameterGrid::new().axis("n", [1, 2]),
                ParameterGrid::new().axis("n", [3]).axis("k", [1, 2]),
            ],
        );
        let sets = unroll_experiment(&spec);
        assert_eq!(sets.len(), 2 + 2);
        assert_eq!(sets[0], ParameterSet::new().with("n", 1));
        assert_eq!(sets[2], set(3, 1));
    }

    #[test]
    fn test_stop_list_consumes_one_entry_per_match() {
        let unrolled = vec![set(1, 1), set(1, 1), set(1, 1), set(2, 2)];
        let stop = vec![set(1, 1), set(1, 1)];
        assert_eq!(remove_stop_list(unrolled, &stop), vec![set(1, 1), set(2, 2)]);
    }

    #[test]
    fn test_stop_list_requires_same_key_set() {
        let unrolled = vec![set(1, 1)];
        let shorter = vec![ParameterSet::new().with("n", 1)];
        let other_keys = vec![ParameterSet::new().with("n", 1).with("q", 1)];
        assert_eq!(remove_stop_list(unrolled.clone(), &shorter), unrolled);
        assert_eq!(remove_stop_list(unrolled.clone(), &other_keys), unrolled);
    }

    #[test]
    fn test_stop_list_ignores_key_order() {
        let stop = vec![ParameterSet::new().with("k", 2).with("n", 1)];
        assert!(remove_stop_list(vec![set(1, 2)], &stop).is_empty());
    }

    #[test]
    fn test_unroll_experiment_applies_stop_list() {
        let spec = ExperimentSpec::new("t", ParameterGrid::new().axis("n", [1, 2]).axis("k", [10, 20]))
            .with_stop_list(vec![set(2, 10)]);
        assert_eq!(unroll_experiment(&spec), vec![set(1, 10), set(1, 20), set(2, 20)]);
    }
}
