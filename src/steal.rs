//! Stealing, claiming, and leapfrogging.
//!
//! Thieves take from the *bottom* of a victim's pool, always the slot at
//! `bot`: the oldest stealable task is the coarsest-grained one, and the
//! farthest from the cache lines the owner is working. A steal is a
//! three-step dance on the slot's status word:
//!
//! 1. claim: `Stealable -> Claimed` names this thief in the word itself;
//! 2. verify: re-read the victim's `bot`. If it moved, the owner retired and
//!    recycled slots under us and our claim may point below the new bottom,
//!    where nobody would ever find it again; back out to `Stealable`;
//! 3. commit: advance `bot` past the slot and run the task.
//!
//! The claimed word also carries the thief's pool top at claim time. That is
//! what makes *leapfrogging* work: an owner blocked syncing a stolen task
//! reads the thief and base out of the word and steals the thief's tasks at
//! or above that base, which are exactly the descendants of its own stolen
//! task. When the thief has nothing to offer for long enough, the owner
//! walks the claim chain transitively, helping whoever ran off with the
//! subtree.

use alloc::vec;
use alloc::vec::Vec;

use crate::counters::Event;
use crate::platform::*;
use crate::task::{Status, TaskDescriptor, ThiefInfo};
use crate::worker::{Worker, WorkerPublic};

// -----------------------------------------------------------------------------
// Claim strategies

/// Result of one attempt to take work from a specific victim.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum StealOutcome {
    /// A task was claimed, executed, and marked done.
    Stole,
    /// The victim had a stealable slot but the protocol lost a race; worth
    /// retrying soon.
    Busy,
    /// Nothing stealable here.
    NoWork,
}

/// The slot-transition primitives the steal and publish paths are written
/// against.
///
/// Two interchangeable implementations exist: the production lock-free one,
/// and one that serializes every contended transition through the victim's
/// claim lock. The locked build trades throughput for a drastically smaller
/// interleaving space, which is what you want when bisecting a heisenbug in
/// the surrounding machinery.
pub(crate) trait ClaimStrategy {
    /// Advisory read of a slot's status.
    fn peek(desc: &TaskDescriptor) -> Status;

    /// `Stealable -> Claimed`, naming the thief. On failure returns the
    /// status actually observed.
    fn try_claim(
        public: &WorkerPublic,
        desc: &TaskDescriptor,
        info: ThiefInfo,
    ) -> Result<(), Status>;

    /// `Claimed -> Stealable`: a thief backing out of its own claim. Cannot
    /// be contended, since the claim holder owns the slot.
    fn revoke(desc: &TaskDescriptor);

    /// `Stealable -> Private`: the owner winning its own slot back at the
    /// sync point.
    fn try_grab(public: &WorkerPublic, desc: &TaskDescriptor) -> Result<(), Status>;

    /// `Private -> Stealable`: the owner publishing. Cannot be contended.
    fn make_stealable(desc: &TaskDescriptor);

    /// `Stealable -> Private`: the owner withdrawing an unclaimed slot from
    /// the market.
    fn try_privatize(public: &WorkerPublic, desc: &TaskDescriptor) -> Result<(), Status>;
}

/// Production strategy: every contended transition is a single
/// compare-exchange on the status word.
#[allow(dead_code)]
pub(crate) struct LockFreeClaims;

impl ClaimStrategy for LockFreeClaims {
    #[inline(always)]
    fn peek(desc: &TaskDescriptor) -> Status {
        desc.status().load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn try_claim(
        _public: &WorkerPublic,
        desc: &TaskDescriptor,
        info: ThiefInfo,
    ) -> Result<(), Status> {
        desc.status()
            .compare_exchange(
                Status::Stealable,
                Status::Claimed(info),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map(|_| ())
    }

    #[inline(always)]
    fn revoke(desc: &TaskDescriptor) {
        desc.status().store(Status::Stealable, Ordering::Release);
    }

    #[inline(always)]
    fn try_grab(_public: &WorkerPublic, desc: &TaskDescriptor) -> Result<(), Status> {
        desc.status()
            .compare_exchange(
                Status::Stealable,
                Status::Private,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map(|_| ())
    }

    #[inline(always)]
    fn make_stealable(desc: &TaskDescriptor) {
        desc.status().store(Status::Stealable, Ordering::Release);
    }

    #[inline(always)]
    fn try_privatize(_public: &WorkerPublic, desc: &TaskDescriptor) -> Result<(), Status> {
        desc.status()
            .compare_exchange(
                Status::Stealable,
                Status::Private,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map(|_| ())
    }
}

/// Debugging strategy: contended transitions hold the victim's claim lock
/// across a plain load and store. The uncontended transitions (`revoke`,
/// `make_stealable`) stay lock-free since their holder is exclusive either
/// way.
#[allow(dead_code)]
pub(crate) struct LockedClaims;

impl LockedClaims {
    fn locked_transition(
        public: &WorkerPublic,
        desc: &TaskDescriptor,
        from: Status,
        to: Status,
    ) -> Result<(), Status> {
        let _guard = public.claim_lock.lock().unwrap();
        match desc.status().load(Ordering::Acquire) {
            status if status == from => {
                desc.status().store(to, Ordering::Release);
                Ok(())
            }
            status => Err(status),
        }
    }
}

impl ClaimStrategy for LockedClaims {
    #[inline(always)]
    fn peek(desc: &TaskDescriptor) -> Status {
        desc.status().load(Ordering::Relaxed)
    }

    fn try_claim(
        public: &WorkerPublic,
        desc: &TaskDescriptor,
        info: ThiefInfo,
    ) -> Result<(), Status> {
        Self::locked_transition(public, desc, Status::Stealable, Status::Claimed(info))
    }

    fn revoke(desc: &TaskDescriptor) {
        desc.status().store(Status::Stealable, Ordering::Release);
    }

    fn try_grab(public: &WorkerPublic, desc: &TaskDescriptor) -> Result<(), Status> {
        Self::locked_transition(public, desc, Status::Stealable, Status::Private)
    }

    fn make_stealable(desc: &TaskDescriptor) {
        desc.status().store(Status::Stealable, Ordering::Release);
    }

    fn try_privatize(public: &WorkerPublic, desc: &TaskDescriptor) -> Result<(), Status> {
        Self::locked_transition(public, desc, Status::Stealable, Status::Private)
    }
}

/// The strategy compiled into this build.
#[cfg(not(feature = "locked-claims"))]
pub(crate) type Claims = LockFreeClaims;
#[cfg(feature = "locked-claims")]
pub(crate) type Claims = LockedClaims;

// -----------------------------------------------------------------------------
// Stealing

impl Worker {
    /// Tries to steal, execute, and complete one task from `victim`'s pool.
    pub(crate) fn steal_from(&self, victim: usize) -> StealOutcome {
        debug_assert_ne!(victim, self.index);
        let slot = &self.rt.slots[victim];
        let public = &slot.public;
        let bot = public.bot.load(Ordering::Acquire);
        let n_public = public.n_public.load(Ordering::Acquire);
        if bot >= n_public {
            return StealOutcome::NoWork;
        }
        let Some(desc) = slot.arena.slot(bot) else {
            return StealOutcome::NoWork;
        };
        // SAFETY: Blocks live until runtime teardown.
        let desc: &TaskDescriptor = unsafe { desc.as_ref() };
        self.counters.bump(Event::StealAttempt);
        match Claims::peek(desc) {
            Status::Stealable => {}
            Status::Empty | Status::Private => return StealOutcome::NoWork,
            Status::Claimed(_) | Status::Done => return StealOutcome::Busy,
        }
        let info = ThiefInfo {
            thief: self.index,
            base: self.pool.top(),
        };
        if Claims::try_claim(public, desc, info).is_err() {
            return StealOutcome::Busy;
        }
        let outcome = self.finish_claim(public, desc, bot, n_public, None);
        if outcome == StealOutcome::Stole {
            tracing::trace!(victim, slot = bot, "stole a task");
        }
        outcome
    }

    /// Second half of the steal dance, shared with leapfrogging: verify,
    /// commit, execute. The claim on `desc` is either consumed or revoked.
    fn finish_claim(
        &self,
        public: &WorkerPublic,
        desc: &TaskDescriptor,
        bot: usize,
        n_public: usize,
        watched: Option<&TaskDescriptor>,
    ) -> StealOutcome {
        // If `bot` moved since we read it, the owner retired stolen slots
        // and may have recycled this very index; an unverified claim could
        // then sit *below* the new bottom where no sync will ever look.
        // While the verification holds, `bot` is frozen: every other party
        // that could move it must first win a transition on this slot.
        if public.bot.load(Ordering::Acquire) != bot {
            Claims::revoke(desc);
            return StealOutcome::Busy;
        }
        if let Some(watched) = watched {
            // Leapfrogging only: the task we are trying to unblock resolved
            // while we were claiming. Hand the slot back and let the sync
            // loop notice.
            if !matches!(watched.status().load(Ordering::Acquire), Status::Claimed(_)) {
                Claims::revoke(desc);
                return StealOutcome::Busy;
            }
        }
        desc.ssn().fetch_add(1, Ordering::Relaxed);
        public.bot.store(bot + 1, Ordering::Release);
        if bot + 1 >= n_public {
            // We took the last stealable task; ask the owner for more.
            public.more_stealable_wanted.store(true, Ordering::Relaxed);
            self.counters.bump(Event::RefillRequest);
        }
        // SAFETY: The claim grants payload ownership, and the payload holds
        // the work stored at spawn.
        unsafe { self.execute_claimed(desc) };
        StealOutcome::Stole
    }

    /// Runs a claimed task through its erased executor and publishes the
    /// result.
    ///
    /// # Safety
    ///
    /// This worker must hold the claim on `desc`.
    unsafe fn execute_claimed(&self, desc: &TaskDescriptor) {
        // SAFETY: Claim held, per the caller; `write_work` initialized the
        // thunk before the slot ever became stealable.
        let execute = unsafe { desc.execute_fn() };
        unsafe { execute(desc.into(), self) };
        // Publishes the result stored by the executor.
        desc.status().store(Status::Done, Ordering::Release);
    }
}

// -----------------------------------------------------------------------------
// Leapfrogging

impl Worker {
    /// One pulse of the wait loop for a stolen task: try a direct leapfrog
    /// from the thief, escalating to a transitive walk after enough
    /// consecutive failures.
    pub(crate) fn leap_pulse(
        &self,
        watched: &TaskDescriptor,
        info: ThiefInfo,
        failures: &mut u32,
    ) {
        self.counters.bump(Event::LeapAttempt);
        match self.leap_attempt(info.thief, info.base, watched) {
            StealOutcome::Stole => {
                self.counters.bump(Event::Leap);
                *failures = 0;
                // Direct leaps are paying off; re-arm escalation slowly.
                let threshold = self.leap_threshold.get();
                self.leap_threshold.set((threshold / 3).max(1));
            }
            StealOutcome::Busy | StealOutcome::NoWork => {
                *failures += 1;
                if *failures > self.leap_threshold.get() {
                    // The thief has had nothing for a while; the subtree
                    // probably moved on. Walk the claim chain, and back off
                    // the (costly) walk if it keeps not helping.
                    let threshold = self.leap_threshold.get();
                    self.leap_threshold
                        .set(threshold.saturating_mul(3).saturating_add(1).min(300));
                    self.trans_leap(watched, info);
                    *failures = 0;
                } else {
                    relax();
                }
            }
        }
    }

    /// Tries to steal one task from `thief`'s pool at or above `floor`,
    /// which restricts the take to descendants of the stolen task the claim
    /// at `watched` tracks.
    fn leap_attempt(&self, thief: usize, floor: usize, watched: &TaskDescriptor) -> StealOutcome {
        debug_assert_ne!(thief, self.index);
        let slot = &self.rt.slots[thief];
        let public = &slot.public;
        let bot = public.bot.load(Ordering::Acquire);
        let n_public = public.n_public.load(Ordering::Acquire);
        if bot < floor || bot >= n_public {
            return StealOutcome::NoWork;
        }
        let Some(desc) = slot.arena.slot(bot) else {
            return StealOutcome::NoWork;
        };
        // SAFETY: Blocks live until runtime teardown.
        let desc: &TaskDescriptor = unsafe { desc.as_ref() };
        match Claims::peek(desc) {
            Status::Stealable => {}
            Status::Empty | Status::Private => return StealOutcome::NoWork,
            Status::Claimed(_) | Status::Done => return StealOutcome::Busy,
        }
        let info = ThiefInfo {
            thief: self.index,
            base: self.pool.top(),
        };
        if Claims::try_claim(public, desc, info).is_err() {
            return StealOutcome::Busy;
        }
        let outcome = self.finish_claim(public, desc, bot, n_public, Some(watched));
        if outcome == StealOutcome::Stole {
            tracing::trace!(thief, slot = bot, "leapfrogged a task");
        }
        outcome
    }

    /// Transitive leapfrog: depth-first walk of the claim chain rooted at
    /// `watched`'s thief, trying to lift work from whichever worker the
    /// blocked subtree has migrated to.
    ///
    /// The walk re-checks `watched` on every step and unwinds the moment it
    /// resolves, so time spent here is bounded by the task we are actually
    /// waiting for.
    fn trans_leap(&self, watched: &TaskDescriptor, first: ThiefInfo) {
        // Claims observed mid-walk can be stale in every way that matters:
        // the `floor` and the claim re-checks below make stale links
        // harmless (the attempt just fails), so no generation counters are
        // needed.
        const TRANS_RETRIES: u32 = 4;
        let mut seen = vec![false; self.num_workers()];
        seen[self.index] = true;
        seen[first.thief] = true;
        let mut stack: Vec<(usize, usize)> = Vec::new();
        let mut current = (first.thief, first.base);
        let mut retries = 0;
        loop {
            if !matches!(watched.status().load(Ordering::Acquire), Status::Claimed(_)) {
                return;
            }
            self.counters.bump(Event::TransStep);
            match self.leap_attempt(current.0, current.1, watched) {
                StealOutcome::Stole => {
                    self.counters.bump(Event::TransLeap);
                    return;
                }
                StealOutcome::Busy if retries < TRANS_RETRIES => {
                    retries += 1;
                    relax();
                }
                StealOutcome::Busy | StealOutcome::NoWork => {
                    retries = 0;
                    // Nothing to lift here. The most recent theft from this
                    // worker is the slot just below its `bot`; if that claim
                    // leads somewhere new, follow it down.
                    let slot = &self.rt.slots[current.0];
                    let bot = slot.public.bot.load(Ordering::Acquire);
                    let next = if bot > current.1 {
                        slot.arena.slot(bot - 1).and_then(|desc| {
                            // SAFETY: Blocks live until runtime teardown.
                            let desc: &TaskDescriptor = unsafe { desc.as_ref() };
                            match desc.status().load(Ordering::Acquire) {
                                Status::Claimed(info) if !seen[info.thief] => Some(info),
                                _ => None,
                            }
                        })
                    } else {
                        None
                    };
                    match next {
                        Some(info) => {
                            seen[info.thief] = true;
                            stack.push(current);
                            current = (info.thief, info.base);
                        }
                        None => match stack.pop() {
                            Some(previous) => current = previous,
                            None => return,
                        },
                    }
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;
    use crate::worker::WorkerSlot;
    use std::sync::Barrier;
    use std::thread;

    fn stealable_slot(slot: &WorkerSlot) -> &TaskDescriptor {
        let base = slot.arena.lookup_or_grow(0, 1).unwrap();
        // SAFETY: The block outlives the test's borrows of the slot.
        let desc = unsafe { &*base.as_ptr() };
        desc.status().store(Status::Stealable, Ordering::Release);
        desc
    }

    fn race_to_claim<S: ClaimStrategy>(thieves: usize) {
        let slot = WorkerSlot::new();
        let desc = stealable_slot(&slot);
        let barrier = Barrier::new(thieves);
        let wins = AtomicUsize::new(0);
        let winner = AtomicUsize::new(usize::MAX);
        thread::scope(|scope| {
            for thief in 0..thieves {
                let barrier = &barrier;
                let wins = &wins;
                let winner = &winner;
                let public = &slot.public;
                scope.spawn(move || {
                    let info = ThiefInfo {
                        thief,
                        base: thief * 10,
                    };
                    barrier.wait();
                    if S::try_claim(public, desc, info).is_ok() {
                        wins.fetch_add(1, Ordering::Relaxed);
                        winner.store(thief, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(wins.load(Ordering::Relaxed), 1);
        let winner = winner.load(Ordering::Relaxed);
        match desc.status().load(Ordering::Acquire) {
            Status::Claimed(info) => {
                assert_eq!(info.thief, winner);
                assert_eq!(info.base, winner * 10);
            }
            other => panic!("expected a claimed slot, found {other:?}"),
        }
    }

    #[test]
    fn claim_is_won_by_exactly_one_thief() {
        for thieves in [2, 4, 8] {
            race_to_claim::<LockFreeClaims>(thieves);
            race_to_claim::<LockedClaims>(thieves);
        }
    }

    fn race_claim_against_grab<S: ClaimStrategy>() {
        let slot = WorkerSlot::new();
        let desc = stealable_slot(&slot);
        let barrier = Barrier::new(2);
        let public = &slot.public;
        let (claimed, grabbed) = thread::scope(|scope| {
            let thief = scope.spawn(|| {
                barrier.wait();
                S::try_claim(public, desc, ThiefInfo { thief: 1, base: 0 }).is_ok()
            });
            barrier.wait();
            let grabbed = S::try_grab(public, desc).is_ok();
            (thief.join().unwrap(), grabbed)
        });
        assert!(claimed != grabbed, "the slot must go to exactly one side");
        let status = desc.status().load(Ordering::Acquire);
        if claimed {
            assert_eq!(status, Status::Claimed(ThiefInfo { thief: 1, base: 0 }));
        } else {
            assert_eq!(status, Status::Private);
        }
    }

    #[test]
    fn claim_and_grab_exclude_each_other() {
        for _ in 0..64 {
            race_claim_against_grab::<LockFreeClaims>();
            race_claim_against_grab::<LockedClaims>();
        }
    }

    #[test]
    fn revoked_claims_reopen_the_slot() {
        let slot = WorkerSlot::new();
        let desc = stealable_slot(&slot);
        let info = ThiefInfo { thief: 3, base: 7 };
        assert!(Claims::try_claim(&slot.public, desc, info).is_ok());
        assert_eq!(
            Claims::try_grab(&slot.public, desc),
            Err(Status::Claimed(info))
        );
        Claims::revoke(desc);
        assert!(Claims::try_grab(&slot.public, desc).is_ok());
        assert_eq!(desc.status().load(Ordering::Acquire), Status::Private);
    }
}
