//! Worker pools: submit units of work, receive completions in arrival order.

use crate::params::ParameterSet;
use crate::record::ResultRecord;
use crate::{Error, Result};
use anyhow::anyhow;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::trace;

/// The per-assignment computation.
///
/// Implemented for every `Fn(&ParameterSet) -> anyhow::Result<ResultRecord>`
/// that is `Send + Sync`, so closures can be passed directly.
pub trait UnitOfWork: Send + Sync {
    /// Compute the result row for one assignment.
    ///
    /// # Errors
    /// Any failure of the computation. The assignment is not persisted.
    fn run(&self, params: &ParameterSet) -> anyhow::Result<ResultRecord>;
}

impl<F> UnitOfWork for F
where
    F: Fn(&ParameterSet) -> anyhow::Result<ResultRecord> + Send + Sync,
{
    fn run(&self, params: &ParameterSet) -> anyhow::Result<ResultRecord> {
        self(params)
    }
}

/// Opaque handle of a submitted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitHandle(u64);

impl UnitHandle {
    /// Raw id, unique per pool.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A finished unit.
#[derive(Debug)]
pub struct Completion {
    /// Handle returned by `submit`
    pub handle: UnitHandle,
    /// Assignment the unit ran with
    pub params: ParameterSet,
    /// Result row, or why the unit failed
    pub outcome: anyhow::Result<ResultRecord>,
    /// Wall time spent inside the unit
    pub elapsed: Duration,
}

/// Executes units of work and yields their completions as they finish.
pub trait WorkerPool {
    /// Queue one unit.
    ///
    /// # Errors
    /// [`Error::Pool`] when the pool no longer accepts work
    fn submit(&mut self, work: Arc<dyn UnitOfWork>, params: ParameterSet) -> Result<UnitHandle>;

    /// Block until the next unit finishes. `None` once nothing is outstanding.
    fn next_completed(&mut self) -> Option<Completion>;

    /// A completion that is already available, without blocking.
    fn try_next_completed(&mut self) -> Option<Completion> {
        None
    }

    /// Drop any per-unit resources the pool still holds for `handle`.
    fn release(&mut self, _handle: UnitHandle) {}

    /// Skip units that have not started yet.
    fn cancel(&mut self) {}

    /// Discard everything still outstanding and accept work again after a
    /// [`cancel`](Self::cancel). Returns the number of completions dropped.
    fn reset(&mut self) -> usize {
        0
    }

    /// Units submitted and not yet returned by `next_completed`.
    fn outstanding(&self) -> usize;
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run_unit(work: &dyn UnitOfWork, params: &ParameterSet) -> (anyhow::Result<ResultRecord>, Duration) {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| work.run(params)))
        .unwrap_or_else(|payload| Err(anyhow!("unit panicked: {}", panic_message(payload.as_ref()))));
    (outcome, started.elapsed())
}

/// Thread pool backed by rayon. Completions travel over an unbounded channel.
///
/// `next_completed` blocks the calling thread; call it from synchronous code,
/// not from inside an async runtime.
pub struct RayonPool {
    pool: rayon::ThreadPool,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    next_handle: u64,
    outstanding: usize,
    in_flight: FxHashMap<UnitHandle, Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RayonPool {
    /// Pool with rayon's default thread count (one per logical CPU).
    ///
    /// # Errors
    /// [`Error::Pool`] if the threads cannot be spawned
    pub fn new() -> Result<Self> {
        Self::with_threads(0)
    }

    /// Pool with `threads` workers (`0` = rayon default).
    ///
    /// # Errors
    /// [`Error::Pool`] if the threads cannot be spawned
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gridrun-worker-{i}"))
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            pool,
            tx,
            rx,
            next_handle: 0,
            outstanding: 0,
            in_flight: FxHashMap::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Worker thread count.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Units whose resources have not been released yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn received(&mut self, completion: Completion) -> Completion {
        self.outstanding = self.outstanding.saturating_sub(1);
        completion
    }
}

impl WorkerPool for RayonPool {
    fn submit(&mut self, work: Arc<dyn UnitOfWork>, params: ParameterSet) -> Result<UnitHandle> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Pool("pool was cancelled".to_string()));
        }
        let handle = UnitHandle(self.next_handle);
        self.next_handle += 1;
        self.outstanding += 1;
        self.in_flight.insert(handle, Instant::now());

        let tx = self.tx.clone();
        let cancelled = Arc::clone(&self.cancelled);
        self.pool.spawn(move || {
            let (outcome, elapsed) = if cancelled.load(Ordering::SeqCst) {
                (Err(anyhow!("cancelled before start")), Duration::ZERO)
            } else {
                run_unit(work.as_ref(), &params)
            };
            // Receiver gone means the pool was dropped; nothing left to report to
            let _ = tx.send(Completion {
                handle,
                params,
                outcome,
                elapsed,
            });
        });
        Ok(handle)
    }

    fn next_completed(&mut self) -> Option<Completion> {
        if self.outstanding == 0 {
            return None;
        }
        let completion = self.rx.blocking_recv()?;
        Some(self.received(completion))
    }

    fn try_next_completed(&mut self) -> Option<Completion> {
        if self.outstanding == 0 {
            return None;
        }
        let completion = self.rx.try_recv().ok()?;
        Some(self.received(completion))
    }

    fn release(&mut self, handle: UnitHandle) {
        if let Some(submitted) = self.in_flight.remove(&handle) {
            trace!(unit = handle.id(), held_ms = submitted.elapsed().as_millis(), "released unit");
        }
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn reset(&mut self) -> usize {
        // Units still queued keep the old flag and finish as cancelled
        let mut dropped = 0;
        while let Some(completion) = self.next_completed() {
            self.release(completion.handle);
            dropped += 1;
        }
        self.cancelled = Arc::new(AtomicBool::new(false));
        dropped
    }

    fn outstanding(&self) -> usize {
        self.outstanding
    }
}

/// Runs each unit on the calling thread when its completion is requested.
///
/// Deterministic; used for debugging and tests.
#[derive(Default)]
pub struct InlinePool {
    queue: VecDeque<(UnitHandle, Arc<dyn UnitOfWork>, ParameterSet)>,
    next_handle: u64,
    cancelled: bool,
}

impl InlinePool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerPool for InlinePool {
    fn submit(&mut self, work: Arc<dyn UnitOfWork>, params: ParameterSet) -> Result<UnitHandle> {
        if self.cancelled {
            return Err(Error::Pool("pool was cancelled".to_string()));
        }
        let handle = UnitHandle(self.next_handle);
        self.next_handle += 1;
        self.queue.push_back((handle, work, params));
        Ok(handle)
    }

    fn next_completed(&mut self) -> Option<Completion> {
        let (handle, work, params) = self.queue.pop_front()?;
        let (outcome, elapsed) = run_unit(work.as_ref(), &params);
        Some(Completion {
            handle,
            params,
            outcome,
            elapsed,
        })
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.queue.clear();
    }

    fn reset(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.cancelled = false;
        dropped
    }

    fn outstanding(&self) -> usize {
        self.queue.len()
    }
}
