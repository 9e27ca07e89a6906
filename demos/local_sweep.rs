//! Local sweep: Parquet + SQLite, rayon workers, resumable
//!
//! ```text
//! RUST_LOG=gridrun=debug cargo run --example local_sweep -- [spec.json] [out_dir]
//! ```
//!
//! Run it twice: the second run finds every result stored and computes nothing.

use anyhow::Context;
use gridrun::dispatch::{DispatchOptions, Dispatcher, RayonPool};
use gridrun::params::{ExperimentSpec, ParameterGrid, ParameterSet};
use gridrun::record::ResultRecord;
use gridrun::sink::{FlushPolicy, ParquetStore, ResultSink, SqliteSink};
use gridrun::snapshot::JsonSnapshot;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Fraction of `trials` random sign vectors whose partial sums stay below `k`.
#[allow(clippy::cast_precision_loss)]
fn walk_success(p: &ParameterSet) -> anyhow::Result<ResultRecord> {
    let n = p.get("n").and_then(|v| v.as_i64()).context("missing n")?;
    let k = p.get("k").and_then(|v| v.as_i64()).context("missing k")?;
    let trials = 200;
    let mut state = (n as u64).wrapping_mul(6_364_136_223_846_793_005) ^ (k as u64);
    let mut hits = 0;
    for _ in 0..trials {
        let mut sum = 0_i64;
        let mut max = 0_i64;
        for _ in 0..n {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            sum += if state >> 63 == 0 { 1 } else { -1 };
            max = max.max(sum.abs());
        }
        if max < k {
            hits += 1;
        }
    }
    Ok(ResultRecord::new().with("success_rate", f64::from(hits) / f64::from(trials)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let spec = match args.next() {
        Some(path) => ExperimentSpec::from_path(&path).with_context(|| format!("loading {path}"))?,
        None => ExperimentSpec::new(
            "random_walk",
            ParameterGrid::new()
                .axis("n", [16, 32, 64, 128])
                .axis("k", [2, 4, 8, 16]),
        ),
    };
    let out = args.next().map_or_else(|| PathBuf::from("gridrun-out"), PathBuf::from);

    let mut sink = ResultSink::builder(spec.table_name())
        .durable(ParquetStore::open(out.join("store"))?)
        .relational(SqliteSink::open(out.join("results.db"))?)
        .flush_policy(FlushPolicy::new(8, Duration::from_secs(30)))
        .build()?;

    let mut dispatcher = Dispatcher::new(RayonPool::new()?)
        .with_options(DispatchOptions::default().with_progress_every(4))
        .with_snapshot(JsonSnapshot::new(out.join("specs")));
    let report = dispatcher.run(&spec, walk_success, &mut sink)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
