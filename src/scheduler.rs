//! The scavenging loop run by idle workers.
//!
//! A worker with an empty pool spends its time here, hunting other workers'
//! stealable regions. The loop has three concerns, in tension with each
//! other: find work fast when there is some, stay off the memory bus when
//! there is none, and never be asleep when work appears.
//!
//! Victim selection is depth-guided sampling. The victim table (every other
//! worker, in an order reshuffled periodically) is scanned in groups of
//! [`sample_width`](crate::Config::sample_width); in each group the thief
//! polls the apparent depth of every pool and attacks only the deepest,
//! which steers thieves toward the coarsest work without a shared queue or
//! any global coordination.
//!
//! When a full scan comes up empty the thief descends a backoff ladder:
//! spin bursts first, a scheduler yield every
//! [`yield_interval`](crate::Config::yield_interval) empty rounds, and
//! finally the [garage](crate::garage) once
//! [`park_interval`](crate::Config::park_interval) rounds have gone nowhere.
//! One successful steal resets the ladder.

use alloc::vec::Vec;

use crate::counters::Event;
use crate::platform::*;
use crate::runtime::RuntimeInner;
use crate::steal::StealOutcome;
use crate::worker::Worker;

impl Worker {
    /// Scavenges until shutdown. The main loop of every helper thread.
    pub(crate) fn look_for_work(&self) {
        let t = &self.rt.tuning;
        let mut victims: Vec<usize> = (0..t.workers).filter(|&i| i != self.index).collect();
        let mut rounds_failed: u32 = 0;
        let mut rounds_since_shuffle: u32 = 0;
        loop {
            if self.rt.shutdown.load(Ordering::Acquire) {
                return;
            }
            if rounds_since_shuffle >= t.rescan_interval {
                rounds_since_shuffle = 0;
                self.shuffle(&mut victims);
            }
            let mut stole = false;
            for group in victims.chunks(t.sample_width) {
                let mut best = None;
                let mut best_depth = 0;
                for &victim in group {
                    let depth = self.rt.slots[victim].public.depth();
                    if depth > best_depth {
                        best_depth = depth;
                        best = Some(victim);
                    }
                }
                if let Some(victim) = best {
                    if self.steal_from(victim) == StealOutcome::Stole {
                        self.counters.bump(Event::Steal);
                        stole = true;
                    }
                }
                if self.rt.shutdown.load(Ordering::Acquire) {
                    return;
                }
            }
            if stole {
                rounds_failed = 0;
                rounds_since_shuffle += 1;
                continue;
            }
            rounds_failed += 1;
            rounds_since_shuffle += 1;
            if rounds_failed >= park_threshold(t.park_interval) {
                if self.rt.garage.park(self.index, || {
                    self.rt.shutdown.load(Ordering::Acquire) || self.any_stealable()
                }) {
                    self.counters.bump(Event::Park);
                }
                // Start a fresh ramp either way: a worker the garage turned
                // back is one of the designated spinners.
                rounds_failed = 0;
            } else if rounds_failed % t.yield_interval == 0 {
                yield_now();
            } else {
                spin_burst(t.backoff_spins);
            }
        }
    }

    fn shuffle(&self, victims: &mut [usize]) {
        for i in (1..victims.len()).rev() {
            victims.swap(i, self.rng.next_usize(i + 1));
        }
    }

    fn any_stealable(&self) -> bool {
        self.rt.slots.iter().any(|slot| slot.public.depth() > 0)
    }
}

#[cfg(not(any(loom, feature = "shuttle")))]
fn spin_burst(spins: u32) {
    for _ in 0..spins {
        core::hint::spin_loop();
    }
}

/// The model checkers must see a yield point where real hardware just burns
/// cycles, or they will explore unbounded spin schedules.
#[cfg(any(loom, feature = "shuttle"))]
fn spin_burst(_spins: u32) {
    yield_now();
}

#[cfg(not(any(loom, feature = "shuttle")))]
fn park_threshold(park_interval: u32) -> u32 {
    park_interval
}

/// Under a model checker, park at the first empty round: the interesting
/// schedules are the ones around the garage handshake, not the spinning.
#[cfg(any(loom, feature = "shuttle"))]
fn park_threshold(_park_interval: u32) -> u32 {
    1
}

/// Body of a helper worker's thread, from online to retired.
pub(crate) fn worker_loop(rt: Arc<RuntimeInner>, index: usize) {
    let worker = Worker::new(index, rt);
    let span = tracing::trace_span!("worker", index);
    let _guard = span.enter();
    tracing::debug!("worker online");
    worker.look_for_work();
    worker.counters.flush_into(&worker.rt.slots[index].totals);
    tracing::debug!("worker retired");
}
