//! Runtime lifecycle: thread fleet, entry point, and teardown.
//!
//! A [`Runtime`] owns one worker per hardware thread. Worker 0 is special:
//! it has no thread of its own, and instead borrows the caller's thread for
//! the duration of each [`run`](Runtime::run) call. The other workers sit
//! in [`look_for_work`](crate::scheduler) from construction until shutdown,
//! stealing whatever `run`'s task tree publishes.
//!
//! Teardown is cooperative: a single shutdown flag flips, the garage wakes
//! every sleeper, and each helper retires after flushing its counters into
//! the shared totals.

use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;

use crate::config::{Config, Tuning};
use crate::counters::{Stats, EVENT_COUNT};
use crate::garage::Garage;
use crate::platform::*;
use crate::unwind;
use crate::worker::{Worker, WorkerSlot};

/// State shared by every worker of a runtime.
pub(crate) struct RuntimeInner {
    pub(crate) tuning: Tuning,
    pub(crate) slots: Box<[WorkerSlot]>,
    pub(crate) garage: Garage,
    pub(crate) shutdown: AtomicBool,
}

/// A fork-join task runtime.
///
/// Construction starts the helper threads; they idle in the scavenging loop
/// (and, soon after, the garage) until [`run`](Runtime::run) gives them
/// something to steal. A `Runtime` is inert but cheap while unused, so it
/// is meant to be built once and kept for the life of the program.
///
/// ```
/// let mut runtime = weft::Runtime::new(weft::Config::default());
/// let (a, b) = runtime.run(|worker| worker.join(|_| 3, |_| 4));
/// assert_eq!((a, b), (3, 4));
/// ```
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    threads: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Builds a runtime and starts its helper threads.
    pub fn new(config: Config) -> Runtime {
        let tuning = Tuning::resolve(&config);
        let slots: Vec<WorkerSlot> = (0..tuning.workers).map(|_| WorkerSlot::new()).collect();
        let inner = Arc::new(RuntimeInner {
            garage: Garage::new(tuning.workers, tuning.max_parked),
            slots: slots.into_boxed_slice(),
            shutdown: AtomicBool::new(false),
            tuning,
        });
        let threads = (1..inner.tuning.workers)
            .map(|index| {
                let rt = inner.clone();
                spawn_named(format!("weft-worker-{index}"), move || {
                    crate::scheduler::worker_loop(rt, index)
                })
            })
            .collect();
        tracing::debug!(workers = inner.tuning.workers, "runtime started");
        Runtime { inner, threads }
    }

    /// Number of workers, including the caller-borrowed worker 0.
    pub fn num_workers(&self) -> usize {
        self.inner.tuning.workers
    }

    /// Runs `f` as worker 0 on the calling thread and returns its result.
    ///
    /// All parallelism starts from the [`Worker`] handed to `f`. The call
    /// returns once `f` does, which (because every spawn must be synced)
    /// means the whole task tree has quiesced.
    ///
    /// A panic escaping `f` is resumed on the caller. Note that a panic
    /// thrown past un-synced tasks leaves the runtime poisoned for further
    /// `run` calls; drop it instead.
    pub fn run<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&Worker) -> R,
    {
        let worker = Worker::new(0, self.inner.clone());
        debug_assert_eq!(worker.public().bot.load(Ordering::Acquire), 0);
        debug_assert_eq!(worker.public().n_public.load(Ordering::Acquire), 0);
        let span = tracing::trace_span!("worker", index = 0usize);
        let _guard = span.enter();
        let result = unwind::halt_unwinding(|| f(&worker));
        worker.counters.flush_into(&self.inner.slots[0].totals);
        match result {
            Ok(value) => value,
            Err(payload) => unwind::resume_unwinding(payload),
        }
    }

    /// Event counts accumulated so far.
    ///
    /// Workers flush their counters when they retire, and worker 0 at the
    /// end of each `run`, so totals cover completed runs; live helpers'
    /// in-flight counts appear once the runtime shuts down.
    pub fn stats(&self) -> Stats {
        let mut sum = [0u64; EVENT_COUNT];
        for slot in self.inner.slots.iter() {
            let snapshot = slot.totals.snapshot();
            for (total, count) in sum.iter_mut().zip(snapshot) {
                *total += count;
            }
        }
        Stats::from_totals(sum)
    }

    /// Stops and joins every helper thread, then returns the final event
    /// counts. Dropping the runtime does the same, minus the counts.
    pub fn shutdown(mut self) -> Stats {
        self.halt();
        let stats = self.stats();
        if self.inner.tuning.emit_stats {
            for (index, slot) in self.inner.slots.iter().enumerate() {
                Stats::from_totals(slot.totals.snapshot()).emit_for_worker(index);
            }
            stats.emit();
        }
        stats
    }

    fn halt(&mut self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.garage.wake_all();
        let mut helper_panic = None;
        for handle in self.threads.drain(..) {
            if let Err(payload) = handle.join() {
                // Join the rest before resuming, or they leak.
                if helper_panic.is_none() {
                    helper_panic = Some(payload);
                }
            }
        }
        tracing::debug!("runtime stopped");
        if let Some(payload) = helper_panic {
            unwind::resume_unwinding(payload)
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.halt();
    }
}
