//! End-to-end sweep: JSON spec -> RayonPool -> Parquet + SQLite + warehouse
//!
//! Tests the complete pipeline:
//! 1. Parse an experiment document
//! 2. Dispatch units on a real thread pool
//! 3. Persist to every sink
//! 4. Re-run with a wider grid and only compute the new points

use gridrun::dispatch::{DispatchOptions, Dispatcher, InlinePool, RayonPool};
use gridrun::export::{copy_table, read_csv, write_csv};
use gridrun::params::{ExperimentSpec, ParameterSet};
use gridrun::record::{ResultRecord, INDEX_COLUMN};
use gridrun::sink::{
    FlushPolicy, MemoryWarehouse, ParquetStore, ResultSink, RowSource, SqliteSink, WarehouseAuth,
};
use gridrun::snapshot::JsonSnapshot;
use gridrun::Value;
use std::collections::BTreeSet;
use std::time::Duration;

const SPEC: &str = r#"{
    "table_name": "phase_transition",
    "multi_res": [
        {"n": [100, 200], "k": [1, 2, 3], "ensemble": ["gaussian"]},
        {"n": [400], "k": [1, 2], "ensemble": ["bernoulli"]}
    ],
    "stop_list": [{"n": 100, "k": 1, "ensemble": "gaussian"}],
    "owner": "lab-3"
}"#;

#[allow(clippy::unnecessary_wraps)]
fn residual(p: &ParameterSet) -> anyhow::Result<ResultRecord> {
    let n = p.get("n").and_then(Value::as_f64).unwrap_or_default();
    let k = p.get("k").and_then(Value::as_f64).unwrap_or_default();
    Ok(ResultRecord::new()
        .with("residual", k / n)
        .with("success", k < 3.0))
}

fn build_sink(root: &std::path::Path, warehouse: &MemoryWarehouse) -> ResultSink {
    ResultSink::builder("phase_transition")
        .durable(ParquetStore::open(root.join("store")).unwrap())
        .relational(SqliteSink::open(root.join("results.db")).unwrap())
        .warehouse(warehouse.clone())
        .flush_policy(FlushPolicy::new(3, Duration::from_secs(60)))
        .build()
        .unwrap()
}

#[test]
fn test_sweep_persists_to_every_sink() {
    let dir = tempfile::tempdir().unwrap();
    let warehouse = MemoryWarehouse::new(WarehouseAuth::ProjectId("lab".into()));
    let spec = ExperimentSpec::from_json_str(SPEC).unwrap();

    let mut sink = build_sink(dir.path(), &warehouse);
    let mut dispatcher = Dispatcher::new(RayonPool::with_threads(4).unwrap())
        .with_options(DispatchOptions::default().with_seed(42).with_progress_every(2))
        .with_snapshot(JsonSnapshot::new(dir.path().join("specs")));
    let report = dispatcher.run(&spec, residual, &mut sink).unwrap();

    // 6 + 2 unrolled, 1 on the stop list
    assert_eq!(report.submitted, 7);
    assert_eq!(report.completed, 7);
    assert_eq!(report.failed, 0);
    assert_eq!(report.index_range(), 0..7);
    assert!(!report.aborted);
    assert!(sink.is_closed());
    assert!(sink.degraded().is_empty());

    // Durable store
    let store = ParquetStore::open(dir.path().join("store")).unwrap();
    let stored = store.select("phase_transition", &[]).unwrap().unwrap();
    assert_eq!(stored.len(), 7);
    let indices: BTreeSet<i64> = stored
        .iter()
        .filter_map(|r| r.get(INDEX_COLUMN).and_then(Value::as_i64))
        .collect();
    assert_eq!(indices, (0..7).collect());
    assert!(stored.iter().all(|r| r.get("residual").is_some()));

    // Relational copy and warehouse copy
    let sqlite = SqliteSink::open(dir.path().join("results.db")).unwrap();
    assert_eq!(sqlite.select("phase_transition", &[]).unwrap().unwrap().len(), 7);
    assert_eq!(warehouse.len("phase_transition"), 7);

    // Snapshot written
    let snapshots: Vec<_> = std::fs::read_dir(dir.path().join("specs")).unwrap().collect();
    assert_eq!(snapshots.len(), 1);
}

#[test]
fn test_rerun_resumes_from_stored_rows() {
    let dir = tempfile::tempdir().unwrap();
    let warehouse = MemoryWarehouse::new(WarehouseAuth::ProjectId("lab".into()));
    let spec = ExperimentSpec::from_json_str(SPEC).unwrap();

    let mut first = build_sink(dir.path(), &warehouse);
    Dispatcher::new(RayonPool::with_threads(2).unwrap())
        .run(&spec, residual, &mut first)
        .unwrap();

    // Same spec again: nothing to do
    let mut again = build_sink(dir.path(), &warehouse);
    let mut dispatcher = Dispatcher::new(RayonPool::with_threads(2).unwrap());
    let plan = dispatcher.plan(&spec, &mut again).unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.dropped, 7);
    assert_eq!(plan.base_index, 7);

    // Wider spec: only the new points run, numbered after the old ones
    let wider = ExperimentSpec::from_json_str(&SPEC.replace("[100, 200]", "[100, 200, 300]")).unwrap();
    let report = dispatcher.run(&wider, residual, &mut again).unwrap();
    assert_eq!(report.completed, 3);
    assert_eq!(report.skipped, 7);
    assert_eq!(report.index_range(), 7..10);
    assert_eq!(warehouse.len("phase_transition"), 10);
}

#[test]
fn test_mixed_type_axis_resumes_from_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let spec = ExperimentSpec::from_json_str(
        r#"{"table_name": "mixed", "parameters": {"p": [1, "a", true, 2.5, null], "q": [0]}}"#,
    )
    .unwrap();
    let durable_only = || {
        ResultSink::builder("mixed")
            .durable(ParquetStore::open(dir.path()).unwrap())
            .build()
            .unwrap()
    };
    let echo = |p: &ParameterSet| -> anyhow::Result<ResultRecord> {
        Ok(ResultRecord::new().with("seen", p.get("p").map_or(0, |_| 1)))
    };

    let mut first = durable_only();
    let mut dispatcher = Dispatcher::new(InlinePool::new());
    let report = dispatcher.run(&spec, echo, &mut first).unwrap();
    assert_eq!(report.completed, 5);

    let stored = ParquetStore::open(dir.path())
        .unwrap()
        .select("mixed", &["p".to_string()])
        .unwrap()
        .unwrap();
    assert!(stored.iter().any(|r| matches!(r.get("p"), Some(Value::Int(1)))));
    assert!(stored.iter().any(|r| matches!(r.get("p"), Some(Value::Bool(true)))));

    let mut again = durable_only();
    let plan = dispatcher.plan(&spec, &mut again).unwrap();
    assert!(plan.is_empty(), "recomputing {:?}", plan.work);
    let report = dispatcher.run(&spec, echo, &mut again).unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(report.skipped, 5);
}

#[test]
fn test_export_and_copy_between_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let warehouse = MemoryWarehouse::new(WarehouseAuth::ProjectId("lab".into()));
    let spec = ExperimentSpec::from_json_str(SPEC).unwrap();
    let mut sink = build_sink(dir.path(), &warehouse);
    Dispatcher::new(RayonPool::with_threads(2).unwrap())
        .run(&spec, residual, &mut sink)
        .unwrap();

    let store = ParquetStore::open(dir.path().join("store")).unwrap();
    let rows = store.select("phase_transition", &[]).unwrap().unwrap();

    let csv_path = dir.path().join("phase_transition.csv");
    write_csv(&rows, std::fs::File::create(&csv_path).unwrap()).unwrap();
    let imported = read_csv(std::fs::File::open(&csv_path).unwrap(), None).unwrap();
    assert_eq!(imported, rows);

    let mut archive = MemoryWarehouse::new(WarehouseAuth::ServiceAccount {
        key_path: dir.path().join("key.json"),
    });
    let copied = copy_table(&store, &mut archive, "phase_transition", true).unwrap();
    assert_eq!(copied, 7);
    let archived = archive.select("phase_transition", &[]).unwrap().unwrap();
    assert!(archived.iter().all(|r| r.get(INDEX_COLUMN).is_none()));
}
