//! Sweep planning benchmarks
//!
//! - Grid unrolling (Cartesian product)
//! - Dedup against stored rows
//! - Row -> RecordBatch conversion for flushes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gridrun::dedup::dedup;
use gridrun::params::{unroll, ParameterGrid};
use gridrun::record::ResultRecord;
use gridrun::sink::rows_to_batch;

/// Three-axis grid with `side^2 * 4` points
fn create_grid(side: i64) -> ParameterGrid {
    ParameterGrid::new()
        .axis("n", (1..=side).map(|i| i * 100))
        .axis("k", 1..=side)
        .axis("ensemble", ["gaussian", "bernoulli", "rademacher", "sparse"])
}

fn bench_unroll(c: &mut Criterion) {
    let mut group = c.benchmark_group("unroll");
    for side in [10_i64, 50, 100] {
        let grid = create_grid(side);
        group.bench_with_input(BenchmarkId::from_parameter(grid.cardinality()), &grid, |b, grid| {
            b.iter(|| unroll(black_box(grid)));
        });
    }
    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup");
    for side in [10_i64, 50, 100] {
        let candidates = unroll(&create_grid(side));
        // Half of the sweep already stored
        let existing: Vec<ResultRecord> = candidates
            .iter()
            .step_by(2)
            .map(ResultRecord::from_params)
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(candidates.len()),
            &(existing, candidates),
            |b, (existing, candidates)| {
                b.iter(|| dedup(black_box(existing), candidates.clone()));
            },
        );
    }
    group.finish();
}

#[allow(clippy::cast_precision_loss)]
fn bench_rows_to_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("rows_to_batch");
    for rows in [1024_i64, 4096] {
        let batch: Vec<ResultRecord> = (0..rows)
            .map(|i| {
                ResultRecord::new()
                    .with("index", i)
                    .with("n", i % 100)
                    .with("residual", i as f64 / 7.0)
                    .with("ensemble", "gaussian")
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &batch, |b, batch| {
            b.iter(|| rows_to_batch(black_box(batch)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_unroll, bench_dedup, bench_rows_to_batch);
criterion_main!(benches);
