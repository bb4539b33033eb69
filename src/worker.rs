//! Workers and the spawn/sync fast paths.
//!
//! A [`Worker`] is one thread's view of the runtime: it owns a task pool
//! outright and steals from everyone else's. The pool is an ordered stack of
//! task descriptors partitioned by three indices:
//!
//! ```text
//!        0 ...... bot ...... n_public ...... top ......
//!        [ stolen )[ stealable )[  private   )[  empty
//! ```
//!
//! Everything below `bot` has been taken by thieves; `[bot, n_public)` is up
//! for grabs; `[n_public, top)` belongs solely to the owner. `bot` and
//! `n_public` live in the shared [`WorkerPublic`] half with acquire/release
//! discipline, while `top` and the derived block caches live in the
//! owner-private [`PoolOwner`] half on the worker's own stack, so the spawn
//! and sync fast paths touch no shared memory at all beyond one relaxed
//! flag load.
//!
//! Thieves may observe the public view slightly stale, but only ever in the
//! conservative direction: a slot can look stealable for a moment after the
//! owner privatized it (the claim then fails), never the other way around.

use core::cell::Cell;
use core::marker::PhantomData;

use crate::config::Tuning;
use crate::counters::{CounterCells, CounterTotals, Event};
use crate::error::SpawnError;
use crate::platform::*;
use crate::pool::{self, Arena};
use crate::runtime::RuntimeInner;
use crate::steal::{ClaimStrategy, Claims};
use crate::task::{Status, TaskDescriptor, Work};
use crate::unwind;
use crate::util::{CachePadded, XorShift64Star};

// -----------------------------------------------------------------------------
// Shared worker state

/// The half of a worker's state that other workers read.
pub(crate) struct WorkerPublic {
    /// First slot not yet stolen. Advanced by the winning thief of each
    /// claim; pulled back down by the owner when it retires stolen slots.
    pub(crate) bot: AtomicUsize,
    /// First private slot. Written only by the owner.
    pub(crate) n_public: AtomicUsize,
    /// Raised by a thief that drained the stealable region; tells the owner
    /// to publish again on its next slow path.
    pub(crate) more_stealable_wanted: AtomicBool,
    /// Serializes claims and grabs against this worker under the
    /// lock-serialized claim strategy. Unused by the lock-free strategy.
    #[cfg_attr(not(feature = "locked-claims"), allow(dead_code))]
    pub(crate) claim_lock: Mutex<()>,
}

impl WorkerPublic {
    /// Apparent number of stealable tasks. A sampling hint only: both loads
    /// are relaxed and the result may be stale by the time it is used.
    #[inline(always)]
    pub(crate) fn depth(&self) -> usize {
        let n_public = self.n_public.load(Ordering::Relaxed);
        let bot = self.bot.load(Ordering::Relaxed);
        n_public.saturating_sub(bot)
    }
}

/// One worker's slot in the runtime's worker table.
pub(crate) struct WorkerSlot {
    pub(crate) public: CachePadded<WorkerPublic>,
    pub(crate) arena: Arena,
    pub(crate) totals: CounterTotals,
}

impl WorkerSlot {
    pub(crate) fn new() -> WorkerSlot {
        WorkerSlot {
            public: CachePadded::new(WorkerPublic {
                bot: AtomicUsize::new(0),
                n_public: AtomicUsize::new(0),
                more_stealable_wanted: AtomicBool::new(false),
                claim_lock: Mutex::new(()),
            }),
            arena: Arena::new(),
            totals: CounterTotals::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// Owner-private pool state

/// The owner's cached view of its own pool. Plain cells: this struct lives
/// on the worker's thread and is never shared.
pub(crate) struct PoolOwner {
    /// First empty slot.
    top: Cell<usize>,
    /// Mirror of the shared `n_public`, readable without an atomic load.
    n_public_cache: Cell<usize>,
    /// Last value of the shared `bot` the owner observed. Only ever lags
    /// the real value, which makes publish triggers conservative.
    bot_cache: Cell<usize>,
    /// Current block and its bounds.
    block_first: Cell<usize>,
    block_end: Cell<usize>,
    base: Cell<*mut TaskDescriptor>,
    /// Countdown to the next privatization.
    unstolen_budget: Cell<u32>,
}

impl PoolOwner {
    fn new(unstolen_budget: u32) -> PoolOwner {
        // The block caches start in a zero-width pseudo-block, so the very
        // first spawn takes the slow path and binds block 0.
        PoolOwner {
            top: Cell::new(0),
            n_public_cache: Cell::new(0),
            bot_cache: Cell::new(0),
            block_first: Cell::new(0),
            block_end: Cell::new(0),
            base: Cell::new(core::ptr::null_mut()),
            unstolen_budget: Cell::new(unstolen_budget),
        }
    }

    #[inline(always)]
    pub(crate) fn top(&self) -> usize {
        self.top.get()
    }

    #[inline(always)]
    fn n_public_cache(&self) -> usize {
        self.n_public_cache.get()
    }

    #[inline(always)]
    fn block_first(&self) -> usize {
        self.block_first.get()
    }

    /// True when the private region has outgrown the stealable window and
    /// the stealable region (as last observed) has room. Cells only.
    #[inline(always)]
    fn publish_due(&self, window: usize, margin: usize) -> bool {
        window != 0
            && self.top.get() - self.n_public_cache.get() > window + margin
            && self.n_public_cache.get() - self.bot_cache.get() < window
    }

    /// Resolves a slot through the current block's cached base pointer.
    ///
    /// # Safety
    ///
    /// `index` must lie within the current block, i.e. in
    /// `[block_first, block_end)`.
    #[inline(always)]
    unsafe fn slot_in_block(&self, index: usize) -> &TaskDescriptor {
        debug_assert!(self.block_first.get() <= index && index < self.block_end.get());
        // SAFETY: Per the caller's contract; block memory lives until
        // runtime teardown.
        unsafe { &*self.base.get().add(index - self.block_first.get()) }
    }

    /// Re-aims the block caches at the block containing `index`, growing the
    /// arena when moving past the last allocated block.
    fn move_to_block(
        &self,
        index: usize,
        arena: &Arena,
        max_blocks: usize,
    ) -> Result<(), SpawnError> {
        let block = pool::block_of(index);
        let base = arena.lookup_or_grow(block, max_blocks)?;
        self.block_first.set(pool::block_first(block));
        self.block_end.set(pool::block_first(block) + pool::block_len(block));
        self.base.set(base.as_ptr());
        Ok(())
    }

    /// Burns one unit of the unstolen budget; true when it hits bottom and
    /// resets, which is the signal to privatize.
    #[inline(always)]
    fn spend_unstolen(&self, reset: u32) -> bool {
        let left = self.unstolen_budget.get();
        if left <= 1 {
            self.unstolen_budget.set(reset);
            true
        } else {
            self.unstolen_budget.set(left - 1);
            false
        }
    }
}

// -----------------------------------------------------------------------------
// Workers

/// A thread participating in a [`Runtime`](crate::Runtime).
///
/// Application code only ever sees workers by reference: the closure passed
/// to [`Runtime::run`](crate::Runtime::run) receives the caller thread's
/// worker, and every task receives the worker actually executing it, which
/// is where further tasks should be spawned.
///
/// Workers are tied to their thread and are neither `Send` nor `Sync`.
pub struct Worker {
    pub(crate) index: usize,
    pub(crate) rt: Arc<RuntimeInner>,
    pub(crate) pool: PoolOwner,
    pub(crate) counters: CounterCells,
    pub(crate) rng: XorShift64Star,
    /// Current escalation threshold for transitive leapfrogging. Adaptive;
    /// see [`steal`](crate::steal).
    pub(crate) leap_threshold: Cell<u32>,
}

impl Worker {
    pub(crate) fn new(index: usize, rt: Arc<RuntimeInner>) -> Worker {
        let unstolen_budget = rt.tuning.unstolen_budget;
        let leap_threshold = rt.tuning.leap_threshold;
        Worker {
            index,
            rt,
            pool: PoolOwner::new(unstolen_budget),
            counters: CounterCells::new(),
            rng: XorShift64Star::new(),
            leap_threshold: Cell::new(leap_threshold),
        }
    }

    /// This worker's index. Worker 0 is the thread that called
    /// [`Runtime::run`](crate::Runtime::run).
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of workers in the runtime, including worker 0.
    #[inline(always)]
    pub fn num_workers(&self) -> usize {
        self.rt.tuning.workers
    }

    #[inline(always)]
    pub(crate) fn shared(&self) -> &WorkerSlot {
        &self.rt.slots[self.index]
    }

    #[inline(always)]
    pub(crate) fn public(&self) -> &WorkerPublic {
        &self.shared().public
    }

    #[inline(always)]
    fn tuning(&self) -> &Tuning {
        &self.rt.tuning
    }
}

// -----------------------------------------------------------------------------
// Spawning

/// Handle to a spawned, not yet retired task.
///
/// Every spawned task must be passed back to [`Worker::sync`], on the same
/// worker, in reverse spawn order; spawns and syncs nest like a call stack.
/// Dropping the handle instead leaks the task and makes the next `sync` on
/// this worker panic.
#[must_use = "spawned tasks must be retired with `Worker::sync`"]
pub struct Spawned<'w, W: Work> {
    index: usize,
    worker: *const Worker,
    _marker: PhantomData<(&'w Worker, W)>,
}

impl<W: Work> Spawned<'_, W> {
    fn new(worker: &Worker, index: usize) -> Spawned<'_, W> {
        Spawned {
            index,
            worker,
            _marker: PhantomData,
        }
    }
}

impl Worker {
    /// Schedules `work` for possible parallel execution and returns a handle
    /// to retire with [`sync`](Worker::sync).
    ///
    /// The work and its result are stored inline in a fixed-size pool slot;
    /// oversized capture lists fail to compile, so box large captures. If
    /// the pool is full and cannot grow, this panics with a
    /// [`SpawnError`] payload; use [`try_spawn`](Worker::try_spawn) to
    /// handle that case structurally.
    #[inline(always)]
    pub fn spawn<W>(&self, work: W) -> Spawned<'_, W>
    where
        W: Work + 'static,
    {
        // SAFETY: `W: 'static`, so the payload cannot borrow anything that
        // could dangle while the task waits in the pool.
        match unsafe { self.spawn_unchecked(work) } {
            Ok(task) => task,
            Err(error) => capacity_overflow(error),
        }
    }

    /// Like [`spawn`](Worker::spawn), but reports pool exhaustion instead of
    /// panicking.
    #[inline(always)]
    pub fn try_spawn<W>(&self, work: W) -> Result<Spawned<'_, W>, SpawnError>
    where
        W: Work + 'static,
    {
        // SAFETY: As in `spawn`.
        unsafe { self.spawn_unchecked(work) }
    }

    /// # Safety
    ///
    /// The caller must guarantee the task is retired (synced) before any
    /// borrow in `work`'s captures expires, on every control path including
    /// unwinding. [`Worker::join`] is the canonical caller.
    #[inline(always)]
    pub(crate) unsafe fn spawn_unchecked<W: Work>(
        &self,
        work: W,
    ) -> Result<Spawned<'_, W>, SpawnError> {
        let t = self.tuning();
        let idx = self.pool.top();
        if idx < self.pool.block_end.get()
            && !self.pool.publish_due(t.stealable_window, t.steal_margin)
            && !self.public().more_stealable_wanted.load(Ordering::Relaxed)
        {
            // SAFETY: `idx` is an empty slot in the current block, invisible
            // to thieves until published.
            let desc = unsafe { self.pool.slot_in_block(idx) };
            unsafe { desc.write_work(work) };
            desc.status().store(Status::Private, Ordering::Relaxed);
            self.pool.top.set(idx + 1);
            self.counters.bump(Event::Spawn);
            Ok(Spawned::new(self, idx))
        } else {
            self.spawn_slow(work, idx)
        }
    }

    fn spawn_slow<W: Work>(&self, work: W, idx: usize) -> Result<Spawned<'_, W>, SpawnError> {
        let t = self.tuning();
        if self.public().more_stealable_wanted.load(Ordering::Relaxed)
            || self.pool.publish_due(t.stealable_window, t.steal_margin)
        {
            self.publish();
        }
        if idx == self.pool.block_end.get() {
            self.pool.move_to_block(idx, &self.shared().arena, t.max_blocks)?;
        }
        // SAFETY: As on the fast path.
        let desc = unsafe { self.pool.slot_in_block(idx) };
        unsafe { desc.write_work(work) };
        desc.status().store(Status::Private, Ordering::Relaxed);
        self.pool.top.set(idx + 1);
        self.counters.bump(Event::Spawn);
        self.counters.bump(Event::SpawnSlow);
        Ok(Spawned::new(self, idx))
    }
}

// -----------------------------------------------------------------------------
// Syncing

impl Worker {
    /// Waits for a spawned task and returns its result.
    ///
    /// If the task was never stolen it is simply executed here, on the spot.
    /// If a thief has it, this worker leapfrogs: it steals work back from
    /// the thief (or, transitively, the thief's thieves) instead of idling,
    /// returning the moment the original task completes. A panic raised by
    /// the task resumes here, whichever thread actually ran it.
    ///
    /// Panics if `task` is not this worker's most recently spawned,
    /// un-synced task.
    #[inline(always)]
    pub fn sync<W: Work>(&self, task: Spawned<'_, W>) -> W::Output {
        self.counters.bump(Event::Sync);
        let idx = self.pool.top().wrapping_sub(1);
        assert!(
            core::ptr::eq(task.worker, self),
            "task was synced on a worker other than the one that spawned it"
        );
        assert!(
            task.index == idx,
            "tasks must be synced in reverse spawn order"
        );
        if idx >= self.pool.n_public_cache()
            && idx >= self.pool.block_first()
            && !self.public().more_stealable_wanted.load(Ordering::Relaxed)
        {
            // SAFETY: Above `n_public` the slot is private: no thief can
            // have touched it, so the payload is still the `W` that spawn
            // stored, and we own it.
            let desc = unsafe { self.pool.slot_in_block(idx) };
            let work = unsafe { desc.take_work::<W>() };
            desc.status().store(Status::Empty, Ordering::Relaxed);
            self.pool.top.set(idx);
            self.counters.bump(Event::Inline);
            work.run(self)
        } else {
            self.sync_slow::<W>(idx)
        }
    }

    fn sync_slow<W: Work>(&self, idx: usize) -> W::Output {
        self.counters.bump(Event::SyncSlow);
        if self.public().more_stealable_wanted.load(Ordering::Relaxed) {
            self.publish();
        }
        if idx >= self.pool.n_public_cache() {
            // Still private; we are here for the publish above or because
            // the slot sits in an older block.
            if idx < self.pool.block_first() {
                self.retreat_to(idx);
            }
            // SAFETY: As on the fast path: private slots hold their work.
            let desc = unsafe { self.pool.slot_in_block(idx) };
            let work = unsafe { desc.take_work::<W>() };
            desc.status().store(Status::Empty, Ordering::Relaxed);
            self.pool.top.set(idx);
            self.counters.bump(Event::Inline);
            work.run(self)
        } else {
            self.sync_contended::<W>(idx)
        }
    }

    /// Sync of a published slot: win it back, or wait out the thief.
    fn sync_contended<W: Work>(&self, idx: usize) -> W::Output {
        let public = self.public();
        let Some(desc) = self.shared().arena.slot(idx) else {
            pool_corrupt()
        };
        // SAFETY: Blocks live until runtime teardown.
        let desc: &TaskDescriptor = unsafe { desc.as_ref() };
        let mut waited = false;
        let mut failures = 0;
        loop {
            match desc.status().load(Ordering::Acquire) {
                Status::Stealable => {
                    if Claims::try_grab(public, desc).is_ok() {
                        self.counters.bump(Event::Grab);
                        // The slot leaves the stealable region before we
                        // consume it. A published slot under sync is always
                        // the highest one, so the boundary lands on `idx`.
                        public.n_public.store(idx, Ordering::Release);
                        self.pool.n_public_cache.set(idx);
                        // SAFETY: The grab won the slot back; no thief ever
                        // touched the payload.
                        let work = unsafe { desc.take_work::<W>() };
                        desc.status().store(Status::Empty, Ordering::Relaxed);
                        self.retire_to(idx);
                        if self.pool.spend_unstolen(self.tuning().unstolen_budget) {
                            self.privatize();
                        }
                        self.counters.bump(Event::Inline);
                        return work.run(self);
                    }
                    // Lost the word to a thief; the next load tells us to
                    // whom.
                }
                Status::Claimed(info) => {
                    if !waited {
                        waited = true;
                        self.counters.bump(Event::WaitStolen);
                    }
                    self.leap_pulse(desc, info, &mut failures);
                }
                Status::Done => return self.reclaim_done::<W>(idx, desc),
                Status::Empty | Status::Private => pool_corrupt(),
            }
        }
    }

    /// Retires a slot whose task a thief completed.
    fn reclaim_done<W: Work>(&self, idx: usize, desc: &TaskDescriptor) -> W::Output {
        let public = self.public();
        // A `Done` slot was necessarily claimed at least once.
        debug_assert!(desc.ssn().load(Ordering::Relaxed) > 0);
        // SAFETY: `Done` was observed with acquire, so the thief's result
        // write happens-before this read.
        let result = unsafe { desc.take_result::<W>() };
        desc.status().store(Status::Empty, Ordering::Relaxed);
        self.retire_to(idx);
        // The slot under sync is the last stolen one, so both shared
        // boundaries collapse onto the new top. `bot` moves first to keep
        // `bot <= n_public` at every instant.
        public.bot.store(idx, Ordering::Release);
        public.n_public.store(idx, Ordering::Release);
        self.pool.bot_cache.set(idx);
        self.pool.n_public_cache.set(idx);
        match result {
            Ok(output) => output,
            Err(payload) => unwind::resume_unwinding(payload),
        }
    }

    #[inline(always)]
    fn retire_to(&self, idx: usize) {
        if idx < self.pool.block_first() {
            self.retreat_to(idx);
        }
        self.pool.top.set(idx);
    }

    fn retreat_to(&self, idx: usize) {
        // The covering block was allocated when the pool first grew past it.
        if self
            .pool
            .move_to_block(idx, &self.shared().arena, self.tuning().max_blocks)
            .is_err()
        {
            pool_corrupt()
        }
    }
}

// -----------------------------------------------------------------------------
// Publishing and privatizing

impl Worker {
    /// Makes a batch of private descriptors stealable and wakes a thief.
    pub(crate) fn publish(&self) {
        let t = self.tuning();
        let public = self.public();
        public.more_stealable_wanted.store(false, Ordering::Relaxed);
        let bot = public.bot.load(Ordering::Acquire);
        self.pool.bot_cache.set(bot);
        let n_public = self.pool.n_public_cache();
        let target = (bot + t.stealable_window)
            .min(self.pool.top().saturating_sub(t.steal_margin))
            .min(n_public + t.publish_chunk)
            .max(n_public);
        if target == n_public {
            return;
        }
        for index in n_public..target {
            let Some(desc) = self.shared().arena.slot(index) else {
                pool_corrupt()
            };
            // SAFETY: Blocks live until runtime teardown.
            Claims::make_stealable(unsafe { desc.as_ref() });
        }
        public.n_public.store(target, Ordering::Release);
        self.pool.n_public_cache.set(target);
        self.counters.bump(Event::Publish);
        tracing::trace!(from = n_public, to = target, "published stealable tasks");
        if self.rt.garage.wake_one() {
            self.counters.bump(Event::Wake);
        }
    }

    /// Pulls up to one publish chunk back out of the stealable region.
    /// Runs when the unstolen budget bottoms out: thieves clearly are not
    /// keeping up, so stop offering them the contended cache lines.
    fn privatize(&self) {
        let t = self.tuning();
        let public = self.public();
        let n_public = self.pool.n_public_cache();
        let bot = public.bot.load(Ordering::Acquire);
        self.pool.bot_cache.set(bot);
        let floor = bot.max(n_public.saturating_sub(t.publish_chunk));
        let mut target = n_public;
        for index in (floor..n_public).rev() {
            let Some(desc) = self.shared().arena.slot(index) else {
                pool_corrupt()
            };
            // SAFETY: Blocks live until runtime teardown.
            if Claims::try_privatize(public, unsafe { desc.as_ref() }).is_err() {
                // A thief is mid-claim down there; everything at and below
                // its slot stays public.
                break;
            }
            target = index;
        }
        if target < n_public {
            public.n_public.store(target, Ordering::Release);
            self.pool.n_public_cache.set(target);
            self.counters.bump(Event::Privatize);
            tracing::trace!(from = n_public, to = target, "privatized stealable tasks");
        }
    }
}

// -----------------------------------------------------------------------------
// Composed operations

impl Worker {
    /// Runs `work` inline, with no pool interaction. The sequential branch
    /// of a decomposition.
    #[inline(always)]
    pub fn call<W: Work>(&self, work: W) -> W::Output {
        work.run(self)
    }

    /// Two-way fork-join: spawns `b`, runs `a` inline, then syncs `b`.
    ///
    /// This is the workhorse of divide-and-conquer decomposition. Unlike
    /// [`spawn`](Worker::spawn), the closures may borrow from the enclosing
    /// scope: `b` is always retired before `join` returns, panic or not.
    /// If both sides panic, `a`'s panic wins and `b`'s payload is dropped.
    #[inline(always)]
    pub fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce(&Worker) -> RA + Send,
        RA: Send,
        B: FnOnce(&Worker) -> RB + Send,
        RB: Send,
    {
        // SAFETY: `b` is retired on every path below, before this frame
        // (and thus any borrow in its captures) can expire.
        let task = match unsafe { self.spawn_unchecked(b) } {
            Ok(task) => task,
            Err(error) => capacity_overflow(error),
        };
        match unwind::halt_unwinding(|| a(self)) {
            Ok(left) => {
                let right = self.sync(task);
                (left, right)
            }
            Err(payload) => {
                self.sync_discard(task);
                unwind::resume_unwinding(payload)
            }
        }
    }

    /// Retires a task, discarding its result and swallowing its panic.
    #[cold]
    fn sync_discard<W: Work>(&self, task: Spawned<'_, W>) {
        let _ = unwind::halt_unwinding(|| self.sync(task));
    }

    /// Applies `body` to every index in `lo..hi` with parallel recursive
    /// splitting, switching to a sequential loop once a subrange is at most
    /// `grain` long. A `grain` of zero is treated as one.
    pub fn for_range<F>(&self, lo: u64, hi: u64, grain: u64, body: &F)
    where
        F: Fn(&Worker, u64) + Sync,
    {
        let grain = grain.max(1);
        if hi <= lo {
            return;
        }
        if hi - lo <= grain {
            for index in lo..hi {
                body(self, index);
            }
            return;
        }
        let mid = lo + (hi - lo) / 2;
        self.join(
            |worker| worker.for_range(lo, mid, grain, body),
            |worker| worker.for_range(mid, hi, grain, body),
        );
    }
}

#[cold]
#[inline(never)]
fn capacity_overflow(error: SpawnError) -> ! {
    std::panic::panic_any(error)
}

#[cold]
#[inline(never)]
fn pool_corrupt() -> ! {
    panic!("task pool bookkeeping is corrupt");
}

// -----------------------------------------------------------------------------

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runtime::Runtime;
    use alloc::vec::Vec;
    use core::num::NonZeroUsize;
    use core::sync::atomic::AtomicU64;

    fn boundary_check(worker: &Worker) {
        // `bot` must be read first: thieves advance it concurrently, but
        // never past `n_public`, and `n_public` is ours alone.
        let bot = worker.public().bot.load(Ordering::Acquire);
        let n_public = worker.public().n_public.load(Ordering::Acquire);
        assert!(bot <= n_public);
        assert!(n_public <= worker.pool.top());
        assert_eq!(worker.pool.n_public_cache(), n_public);
    }

    #[test]
    fn boundaries_hold_under_random_traces() {
        let mut config = Config::default();
        config.workers = NonZeroUsize::new(2);
        config.stealable_window = Some(3);
        config.publish_chunk = 2;
        config.unstolen_budget = 4;
        let mut runtime = Runtime::new(config);

        let executed = Arc::new(AtomicU64::new(0));
        let spawned = runtime.run(|worker| {
            let rng = XorShift64Star::from_seed(0x0b5e55);
            let mut pending = Vec::new();
            let mut spawned = 0u64;
            for _ in 0..4000 {
                let spawn_now =
                    pending.is_empty() || (pending.len() < 64 && rng.next_usize(2) == 0);
                if spawn_now {
                    let executed = executed.clone();
                    pending.push(worker.spawn(move |_: &Worker| {
                        executed.fetch_add(1, Ordering::Relaxed);
                    }));
                    spawned += 1;
                } else {
                    let task = pending.pop().unwrap();
                    worker.sync(task);
                }
                boundary_check(worker);
            }
            while let Some(task) = pending.pop() {
                worker.sync(task);
                boundary_check(worker);
            }
            spawned
        });

        let stats = runtime.shutdown();
        assert_eq!(executed.load(Ordering::Relaxed), spawned);
        assert_eq!(stats.completed(), stats.spawned);
    }

    #[test]
    fn publish_grab_and_privatize_cycle() {
        // One worker with a forced window: the whole publish/grab/privatize
        // machinery runs with nobody to race against, so every counter is
        // exact.
        let mut config = Config::default();
        config.workers = NonZeroUsize::new(1);
        config.stealable_window = Some(2);
        config.unstolen_budget = 1;
        let mut runtime = Runtime::new(config);

        runtime.run(|worker| {
            let mut pending = Vec::new();
            for _ in 0..40 {
                pending.push(worker.spawn(|_: &Worker| ()));
            }
            while let Some(task) = pending.pop() {
                worker.sync(task);
            }
        });

        let stats = runtime.shutdown();
        assert_eq!(stats.spawned, 40);
        // Two slow spawns: the first spawn of a fresh pool always binds
        // block 0 through the slow path, then one more publishes.
        assert_eq!(stats.spawned_slow, 2);
        assert_eq!(stats.synced, 40);
        assert_eq!(stats.synced_slow, 1);
        assert_eq!(stats.inlined, 40);
        assert_eq!(stats.grabbed, 1);
        assert_eq!(stats.published, 1);
        assert_eq!(stats.privatized, 1);
        assert_eq!(stats.stolen, 0);
        assert_eq!(stats.completed(), stats.spawned);
    }

    #[test]
    fn oversized_window_is_capped_by_margin() {
        // Window and chunk both dwarf the pool, so the steal margin is the
        // binding limit: with margin 1 and 5 tasks, exactly 4 go public.
        let mut config = Config::default();
        config.workers = NonZeroUsize::new(1);
        config.stealable_window = Some(100);
        config.publish_chunk = 100;
        config.steal_margin = 1;
        let mut runtime = Runtime::new(config);
        runtime.run(|worker| {
            let mut pending = Vec::new();
            for _ in 0..5 {
                pending.push(worker.spawn(|_: &Worker| ()));
            }
            worker.publish();
            assert_eq!(worker.public().n_public.load(Ordering::Acquire), 4);
            while let Some(task) = pending.pop() {
                worker.sync(task);
            }
        });
    }
}
