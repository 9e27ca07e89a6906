//! Dispatcher: unroll, dedup against stored results, fan out, persist
//!
//! ## Run protocol
//!
//! ```text
//! snapshot spec ─> unroll ─> read existing (key columns) ─> dedup ─> shuffle
//!                                                                     │
//!      final_flush <── stage + flush_if_due <── completions <── submit all
//! ```
//!
//! Units run in parallel on a [`WorkerPool`]; the dispatcher itself is one
//! control flow that blocks only on the pool's completion stream. Results are
//! handled in arrival order, not submission order.

mod pool;

pub use pool::{Completion, InlinePool, RayonPool, UnitHandle, UnitOfWork, WorkerPool};

use crate::dedup::{dedup, key_columns};
use crate::params::{unroll_experiment, ExperimentSpec, ParameterSet};
use crate::record::ResultRecord;
use crate::sink::ResultSink;
use crate::snapshot::SpecSnapshot;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Cooperative cancellation flag, checked between completion batches.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Create a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop. Already-persisted and already-received results are kept.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`abort`](Self::abort) was called on any clone.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run options.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Shuffle seed; `None` draws from entropy
    pub seed: Option<u64>,
    /// Log progress every this many finished units (0 disables)
    pub progress_every: usize,
    /// Cancellation flag
    pub abort: Option<AbortHandle>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            seed: None,
            progress_every: 10,
            abort: None,
        }
    }
}

impl DispatchOptions {
    /// Fix the shuffle seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Progress log interval.
    #[must_use]
    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    /// Attach a cancellation flag.
    #[must_use]
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(AbortHandle::is_aborted)
    }
}

/// What a run would do, without doing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkPlan {
    /// Assignments still to compute, in submission order
    pub work: Vec<ParameterSet>,
    /// Rows already stored; first `index` of this run
    pub base_index: i64,
    /// Assignments after unroll and stop list
    pub candidates: usize,
    /// Candidates dropped by dedup
    pub dropped: usize,
}

impl WorkPlan {
    /// Assignments to compute.
    #[must_use]
    pub fn len(&self) -> usize {
        self.work.len()
    }

    /// True when everything is already stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.work.is_empty()
    }
}

/// Outcome of [`Dispatcher::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// `index` of the first row this run stored
    pub base_index: i64,
    /// `index` the next row would have received
    pub next_index: i64,
    /// Units submitted
    pub submitted: usize,
    /// Units that produced a stored row
    pub completed: usize,
    /// Units that failed (not stored; recomputed by the next run)
    pub failed: usize,
    /// Candidates skipped because their results were already stored
    pub skipped: usize,
    /// Wall time from first submit to final flush
    pub elapsed: Duration,
    /// `elapsed / finished units`, zero when nothing ran
    pub seconds_per_unit: f64,
    /// Stopped early through an [`AbortHandle`]
    pub aborted: bool,
}

impl RunReport {
    /// Indices stamped on the rows this run stored.
    #[must_use]
    pub const fn index_range(&self) -> Range<i64> {
        self.base_index..self.next_index
    }
}

/// Drives one experiment through a worker pool into a [`ResultSink`].
///
/// # Example
///
/// ```rust
/// use gridrun::dispatch::{DispatchOptions, Dispatcher, InlinePool};
/// use gridrun::params::{ExperimentSpec, ParameterGrid, ParameterSet};
/// use gridrun::record::ResultRecord;
/// use gridrun::sink::{ParquetStore, ResultSink};
///
/// # fn main() -> gridrun::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let spec = ExperimentSpec::new("squares", ParameterGrid::new().axis("n", 1..=4));
/// let mut sink = ResultSink::builder("squares")
///     .durable(ParquetStore::open(dir.path())?)
///     .build()?;
///
/// let unit = |p: &ParameterSet| -> anyhow::Result<ResultRecord> {
///     let n = p.get("n").and_then(|v| v.as_i64()).unwrap_or_default();
///     Ok(ResultRecord::new().with("square", n * n))
/// };
///
/// let mut dispatcher = Dispatcher::new(InlinePool::new())
///     .with_options(DispatchOptions::default().with_seed(7));
/// let report = dispatcher.run(&spec, unit, &mut sink)?;
/// assert_eq!(report.completed, 4);
/// assert_eq!(report.index_range(), 0..4);
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<P: WorkerPool> {
    pool: P,
    options: DispatchOptions,
    snapshot: Option<Box<dyn SpecSnapshot>>,
}

impl<P: WorkerPool> Dispatcher<P> {
    /// Dispatcher over `pool` with default options and no snapshot.
    #[must_use]
    pub fn new(pool: P) -> Self {
        Self {
            pool,
            options: DispatchOptions::default(),
            snapshot: None,
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Record the spec at the start of every run.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: impl SpecSnapshot + 'static) -> Self {
        self.snapshot = Some(Box::new(snapshot));
        self
    }

    /// Run options.
    #[must_use]
    pub const fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &P {
        &self.pool
    }

    /// Unroll, read existing rows, dedup and shuffle; submit nothing.
    ///
    /// # Errors
    /// [`Error::Configuration`] for an invalid spec or a sink bound to another
    /// table; [`Error::SinkClosed`] for a finalized sink
    pub fn plan(&self, spec: &ExperimentSpec, sink: &mut ResultSink) -> Result<WorkPlan> {
        spec.validate()?;
        if spec.table_name() != sink.table_name() {
            return Err(Error::Configuration(format!(
                "experiment table '{}' does not match result sink table '{}'",
                spec.table_name(),
                sink.table_name()
            )));
        }

        let candidates = unroll_experiment(spec);
        let existing = if candidates.is_empty() {
            Vec::new()
        } else {
            sink.read_projection(&key_columns(&candidates))?
        };
        let base_index = i64::try_from(existing.len())
            .map_err(|_| Error::InvalidInput("existing row count overflows i64".to_string()))?;

        let candidate_count = candidates.len();
        let mut work = dedup(&existing, candidates);
        match self.options.seed {
            Some(seed) => work.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => work.shuffle(&mut rand::thread_rng()),
        }

        Ok(WorkPlan {
            dropped: candidate_count - work.len(),
            candidates: candidate_count,
            base_index,
            work,
        })
    }

    /// Run the experiment to completion (or until aborted) and final-flush `sink`.
    ///
    /// Failed units are logged and counted, not stored.
    ///
    /// # Errors
    /// Configuration problems, [`Error::Pool`] if the pool refuses work, and
    /// [`Error::Durability`] if the durable store rejects a batch
    pub fn run<U>(&mut self, spec: &ExperimentSpec, unit: U, sink: &mut ResultSink) -> Result<RunReport>
    where
        U: UnitOfWork + 'static,
    {
        spec.validate()?;
        let stale = self.pool.reset();
        if stale > 0 {
            warn!(stale, "discarded completions left over from an aborted run");
        }
        if let Some(snapshot) = &self.snapshot {
            match snapshot.record(spec) {
                Ok(path) => info!(path = %path.display(), "recorded experiment spec"),
                Err(e) => warn!(table = spec.table_name(), error = %e, "failed to record experiment spec"),
            }
        }

        let plan = self.plan(spec, sink)?;
        sink.start_index(plan.base_index);
        info!(
            table = spec.table_name(),
            candidates = plan.candidates,
            skipped = plan.dropped,
            work = plan.len(),
            base_index = plan.base_index,
            "dispatching experiment"
        );

        let started = Instant::now();
        let total = plan.len();
        let unit: Arc<dyn UnitOfWork> = Arc::new(unit);
        let mut submitted = 0;
        for params in plan.work {
            if self.options.aborted() {
                break;
            }
            self.pool.submit(Arc::clone(&unit), params)?;
            submitted += 1;
        }

        let mut finished = 0_usize;
        let mut completed = 0_usize;
        let mut failed = 0_usize;
        let mut aborted = self.options.aborted();

        while !aborted {
            let Some(first) = self.pool.next_completed() else {
                break;
            };
            let mut ready = vec![first];
            while let Some(more) = self.pool.try_next_completed() {
                ready.push(more);
            }

            for completion in ready {
                self.pool.release(completion.handle);
                match completion.outcome {
                    Ok(row) => {
                        sink.stage(with_params(&completion.params, row))?;
                        completed += 1;
                    }
                    Err(e) => {
                        failed += 1;
                        error!(
                            params = ?completion.params,
                            error = %e,
                            "unit of work failed, leaving it for the next run"
                        );
                    }
                }
                finished += 1;
                if self.options.progress_every > 0 && finished % self.options.progress_every == 0 {
                    log_progress(finished, total, started.elapsed());
                }
            }
            sink.flush_if_due()?;

            if self.options.aborted() {
                warn!(
                    table = spec.table_name(),
                    finished,
                    outstanding = self.pool.outstanding(),
                    "abort requested, cancelling queued units"
                );
                self.pool.cancel();
                aborted = true;
            }
        }

        sink.final_flush()?;
        let elapsed = started.elapsed();
        let seconds_per_unit = per_unit(elapsed, finished);
        let report = RunReport {
            base_index: plan.base_index,
            next_index: sink.next_index(),
            submitted,
            completed,
            failed,
            skipped: plan.dropped,
            elapsed,
            seconds_per_unit,
            aborted,
        };
        info!(
            table = spec.table_name(),
            completed,
            failed,
            elapsed_secs = elapsed.as_secs_f64(),
            seconds_per_unit,
            first_index = report.base_index,
            next_index = report.next_index,
            aborted,
            "experiment finished"
        );
        Ok(report)
    }
}

/// Make sure the stored row carries its assignment; the unit's own values win.
fn with_params(params: &ParameterSet, row: ResultRecord) -> ResultRecord {
    let mut merged = ResultRecord::from_params(params);
    for (column, value) in row {
        merged.set(column, value);
    }
    merged
}

#[allow(clippy::cast_precision_loss)]
fn per_unit(elapsed: Duration, finished: usize) -> f64 {
    if finished == 0 {
        0.0
    } else {
        elapsed.as_secs_f64() / finished as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn log_progress(finished: usize, total: usize, elapsed: Duration) {
    let spu = per_unit(elapsed, finished);
    let remaining = total.saturating_sub(finished) as f64 * spu;
    info!(
        finished,
        total,
        elapsed_secs = elapsed.as_secs_f64(),
        seconds_per_unit = spu,
        remaining_secs = remaining,
        "progress"
    );
}
