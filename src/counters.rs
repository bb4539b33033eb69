//! Per-worker event counters.
//!
//! Workers bump plain [`Cell`] counters on their own thread, so the hot paths
//! pay nothing for instrumentation. Each worker flushes its cells into shared
//! atomic totals when it retires (or when the caller thread finishes a run),
//! and the runtime aggregates the totals into a [`Stats`] snapshot.

use core::cell::Cell;

use crate::platform::*;

/// Countable runtime events, used as indices into the counter arrays.
#[derive(Clone, Copy, Debug)]
#[repr(usize)]
pub(crate) enum Event {
    /// A task was spawned.
    Spawn,
    /// A spawn took the slow path (block growth, publishing, or a refill
    /// request).
    SpawnSlow,
    /// A sync was started.
    Sync,
    /// A sync took the slow path.
    SyncSlow,
    /// The owner executed its own task at a sync point.
    Inline,
    /// The owner won a task back from the stealable region. These executions
    /// are also counted under [`Event::Inline`].
    Grab,
    /// A sync found its task stolen and had to wait for the thief.
    WaitStolen,
    /// A steal was attempted against an apparently non-empty victim.
    StealAttempt,
    /// A stolen task was executed from the idle scheduler loop.
    Steal,
    /// A leapfrog steal-back was attempted while blocked on a stolen task.
    LeapAttempt,
    /// A leapfrog steal-back was executed.
    Leap,
    /// A link of a thief chain was examined during a transitive walk.
    TransStep,
    /// A task was stolen and executed during a transitive walk.
    TransLeap,
    /// The owner published a batch of descriptors.
    Publish,
    /// The owner privatized a batch of descriptors.
    Privatize,
    /// A thief drained a victim's stealable region and asked for more.
    RefillRequest,
    /// A worker parked in the garage.
    Park,
    /// A worker delivered a wake token to a parked worker.
    Wake,
}

pub(crate) const EVENT_COUNT: usize = 18;

/// Owner-private counter cells. Not synchronized; lives inside a [`Worker`].
///
/// [`Worker`]: crate::Worker
pub(crate) struct CounterCells {
    cells: [Cell<u64>; EVENT_COUNT],
}

impl CounterCells {
    pub fn new() -> CounterCells {
        CounterCells {
            cells: [const { Cell::new(0) }; EVENT_COUNT],
        }
    }

    #[inline(always)]
    pub fn bump(&self, event: Event) {
        let cell = &self.cells[event as usize];
        cell.set(cell.get() + 1);
    }

    /// Drains every cell into the shared totals. Called when a worker
    /// retires, so a `Stats` snapshot only ever reflects finished runs.
    pub fn flush_into(&self, totals: &CounterTotals) {
        for (cell, total) in self.cells.iter().zip(totals.totals.iter()) {
            total.fetch_add(cell.take(), Ordering::Relaxed);
        }
    }
}

/// Shared, cumulative totals for one worker.
pub(crate) struct CounterTotals {
    totals: [AtomicU64; EVENT_COUNT],
}

impl CounterTotals {
    pub fn new() -> CounterTotals {
        CounterTotals {
            totals: core::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn snapshot(&self) -> [u64; EVENT_COUNT] {
        core::array::from_fn(|event| self.totals[event].load(Ordering::Relaxed))
    }
}

/// Aggregated runtime statistics, summed over all workers.
///
/// Produced by [`Runtime::stats`](crate::Runtime::stats) and
/// [`Runtime::shutdown`](crate::Runtime::shutdown). Counters only reflect
/// workers that have flushed, so a snapshot taken while a run is in flight
/// undercounts; a snapshot after `shutdown` is exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct Stats {
    /// Tasks spawned.
    pub spawned: u64,
    /// Spawns that took the slow path.
    pub spawned_slow: u64,
    /// Syncs started.
    pub synced: u64,
    /// Syncs that took the slow path.
    pub synced_slow: u64,
    /// Tasks executed by their owner at a sync point.
    pub inlined: u64,
    /// Tasks the owner won back from the stealable region (a subset of
    /// `inlined`).
    pub grabbed: u64,
    /// Syncs that found their task stolen.
    pub stolen_waits: u64,
    /// Steal attempts against apparently non-empty victims.
    pub steal_attempts: u64,
    /// Tasks stolen and executed from the idle scheduler loop.
    pub stolen: u64,
    /// Leapfrog steal-back attempts.
    pub leap_attempts: u64,
    /// Tasks executed by leapfrogging directly from the thief.
    pub leapfrogged: u64,
    /// Thief-chain links examined during transitive walks.
    pub trans_steps: u64,
    /// Tasks executed during transitive walks.
    pub trans_leapfrogged: u64,
    /// Publish steps performed.
    pub published: u64,
    /// Privatize steps performed.
    pub privatized: u64,
    /// Times a thief drained a victim and requested a refill.
    pub refill_requests: u64,
    /// Times a worker parked.
    pub parked: u64,
    /// Wake tokens delivered.
    pub woken: u64,
}

impl Stats {
    pub(crate) fn from_totals(sum: [u64; EVENT_COUNT]) -> Stats {
        Stats {
            spawned: sum[Event::Spawn as usize],
            spawned_slow: sum[Event::SpawnSlow as usize],
            synced: sum[Event::Sync as usize],
            synced_slow: sum[Event::SyncSlow as usize],
            inlined: sum[Event::Inline as usize],
            grabbed: sum[Event::Grab as usize],
            stolen_waits: sum[Event::WaitStolen as usize],
            steal_attempts: sum[Event::StealAttempt as usize],
            stolen: sum[Event::Steal as usize],
            leap_attempts: sum[Event::LeapAttempt as usize],
            leapfrogged: sum[Event::Leap as usize],
            trans_steps: sum[Event::TransStep as usize],
            trans_leapfrogged: sum[Event::TransLeap as usize],
            published: sum[Event::Publish as usize],
            privatized: sum[Event::Privatize as usize],
            refill_requests: sum[Event::RefillRequest as usize],
            parked: sum[Event::Park as usize],
            woken: sum[Event::Wake as usize],
        }
    }

    /// Total tasks executed. At quiescence this equals [`spawned`]:
    /// every spawned task is run exactly once, by its owner, by a thief, or
    /// by a leapfrogging waiter.
    ///
    /// [`spawned`]: Stats::spawned
    pub fn completed(&self) -> u64 {
        self.inlined + self.stolen + self.leapfrogged + self.trans_leapfrogged
    }

    /// Logs the snapshot at `info` level.
    pub fn emit(&self) {
        tracing::info!(
            spawned = self.spawned,
            spawned_slow = self.spawned_slow,
            synced = self.synced,
            synced_slow = self.synced_slow,
            inlined = self.inlined,
            grabbed = self.grabbed,
            stolen_waits = self.stolen_waits,
            steal_attempts = self.steal_attempts,
            stolen = self.stolen,
            leap_attempts = self.leap_attempts,
            leapfrogged = self.leapfrogged,
            trans_steps = self.trans_steps,
            trans_leapfrogged = self.trans_leapfrogged,
            published = self.published,
            privatized = self.privatized,
            refill_requests = self.refill_requests,
            parked = self.parked,
            woken = self.woken,
            "runtime counters"
        );
    }

    /// Logs one worker's share of the counters, ahead of the totals line.
    pub(crate) fn emit_for_worker(&self, index: usize) {
        tracing::info!(
            worker = index,
            spawned = self.spawned,
            spawned_slow = self.spawned_slow,
            synced = self.synced,
            synced_slow = self.synced_slow,
            inlined = self.inlined,
            grabbed = self.grabbed,
            stolen_waits = self.stolen_waits,
            steal_attempts = self.steal_attempts,
            stolen = self.stolen,
            leap_attempts = self.leap_attempts,
            leapfrogged = self.leapfrogged,
            trans_steps = self.trans_steps,
            trans_leapfrogged = self.trans_leapfrogged,
            published = self.published,
            privatized = self.privatized,
            refill_requests = self.refill_requests,
            parked = self.parked,
            woken = self.woken,
            "worker counters"
        );
    }
}
