//! # gridrun: Resumable Parameter-Sweep Coordinator
//!
//! **Version**: 0.1.0
//!
//! gridrun runs a computation over every point of a declarative parameter
//! grid, in parallel, and persists one result row per point. Re-running the
//! same experiment only computes the points that have no stored result yet.
//!
//! ## Design Principles
//!
//! - **Append-only persistence**: results are buffered and flushed in whole
//!   batches; the durable store never sees row updates
//! - **Resume by dedup**: no checkpoint files; the stored rows are the progress
//! - **Graceful degradation**: optional sinks may fail without stopping a run;
//!   the durable store may not
//!
//! ## Architecture
//!
//! ```text
//! ExperimentSpec ─> params::unroll_experiment ─> dedup ─> dispatch::Dispatcher
//!                                                 ^              │ WorkerPool
//!                                                 │              v
//!                                      sink::ResultSink <── result rows
//!                        (ParquetStore + optional SqliteSink / Warehouse)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use gridrun::dispatch::{Dispatcher, RayonPool};
//! use gridrun::params::{ExperimentSpec, ParameterSet};
//! use gridrun::record::ResultRecord;
//! use gridrun::sink::{ParquetStore, ResultSink};
//!
//! let spec = ExperimentSpec::from_path("sweeps/phase_transition.json")?;
//! let mut sink = ResultSink::builder(spec.table_name())
//!     .durable(ParquetStore::open("results")?)
//!     .build()?;
//!
//! let unit = |p: &ParameterSet| -> anyhow::Result<ResultRecord> {
//!     let n = p.get("n").and_then(|v| v.as_f64()).unwrap_or_default();
//!     Ok(ResultRecord::new().with("log_n", n.ln()))
//! };
//!
//! let report = Dispatcher::new(RayonPool::new()?).run(&spec, unit, &mut sink)?;
//! println!("stored rows {:?}", report.index_range());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod params;
pub mod record;
pub mod sink;
pub mod snapshot;
pub mod value;

pub use error::{Error, Result};
pub use value::Value;
