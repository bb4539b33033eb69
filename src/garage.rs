//! The garage: where idle workers park.
//!
//! The garage keeps one numbered stall per worker. A worker that has scanned
//! every victim fruitlessly for long enough drives into its stall and blocks;
//! a worker that publishes new work wakes exactly one parked thief, and
//! shutdown wakes everyone. The number of simultaneously parked workers is
//! capped so that some thieves always stay hot while work may still appear.
//!
//! Natively each stall is a futex word with a sticky wake token: a wake that
//! arrives while its target is still walking to the stall is consumed on
//! arrival instead of being lost. Under loom and shuttle, which have no
//! futexes, the whole garage falls back to a mutex and condvar.

#[cfg(not(any(loom, feature = "shuttle")))]
pub(crate) use futex::Garage;

#[cfg(any(loom, feature = "shuttle"))]
pub(crate) use condvar::Garage;

#[cfg(not(any(loom, feature = "shuttle")))]
mod futex {
    use alloc::boxed::Box;

    use crate::platform::*;
    use crate::util::CachePadded;

    /// A stall with no occupant and no pending wake.
    const OPEN: u32 = 0;

    /// A wake token was delivered; sticky until the stall's owner consumes it.
    const TOKEN: u32 = 1;

    /// The stall's owner is blocked in the futex, or about to be.
    const PARKED: u32 = 2;

    struct Stall {
        state: AtomicU32,
    }

    pub(crate) struct Garage {
        stalls: Box<[CachePadded<Stall>]>,
        /// Workers currently parked or committed to parking.
        parked: AtomicUsize,
        /// Rotates which stall a wake lands in, for fairness.
        next_wake: AtomicUsize,
        max_parked: usize,
    }

    impl Garage {
        pub fn new(workers: usize, max_parked: usize) -> Garage {
            Garage {
                stalls: (0..workers)
                    .map(|_| {
                        CachePadded::new(Stall {
                            state: AtomicU32::new(OPEN),
                        })
                    })
                    .collect(),
                parked: AtomicUsize::new(0),
                next_wake: AtomicUsize::new(0),
                max_parked,
            }
        }

        /// Parks the calling worker until a wake token arrives. Returns
        /// `false` without blocking if the parked-worker cap is reached, if a
        /// token was already waiting, or if `should_wake` reports that there
        /// is a reason to stay up.
        ///
        /// `should_wake` is evaluated after the stall is marked `PARKED`,
        /// separated by a fence that pairs with the one in wakers: either a
        /// concurrent waker observes the `PARKED` stall, or this poll
        /// observes whatever that waker published. A wake can therefore
        /// never fall between the poll and the block.
        pub fn park<F: Fn() -> bool>(&self, worker: usize, should_wake: F) -> bool {
            if self.parked.fetch_add(1, Ordering::Relaxed) >= self.max_parked {
                self.parked.fetch_sub(1, Ordering::Relaxed);
                return false;
            }

            let stall = &self.stalls[worker].state;
            let slept;
            if stall.swap(PARKED, Ordering::AcqRel) == TOKEN {
                // A wake was already waiting for us.
                slept = false;
            } else {
                fence(Ordering::SeqCst);
                if should_wake() {
                    slept = false;
                } else {
                    atomic_wait::wait(stall, PARKED);
                    slept = true;
                }
            }

            // Consume any token delivered while we slept; we are awake and
            // about to rescan regardless. The acquire pairs with the waker's
            // token store so the rescan sees what it published.
            stall.swap(OPEN, Ordering::Acquire);
            self.parked.fetch_sub(1, Ordering::Relaxed);
            slept
        }

        /// Delivers a wake token to one parked worker, if any. Returns
        /// whether a token was delivered.
        ///
        /// Callers must already have published the work the woken thief is
        /// meant to find.
        pub fn wake_one(&self) -> bool {
            fence(Ordering::SeqCst);
            if self.parked.load(Ordering::Relaxed) == 0 {
                return false;
            }
            let stalls = self.stalls.len();
            let start = self.next_wake.fetch_add(1, Ordering::Relaxed);
            for offset in 0..stalls {
                let stall = &self.stalls[(start + offset) % stalls].state;
                if stall
                    .compare_exchange(PARKED, TOKEN, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    atomic_wait::wake_one(stall);
                    return true;
                }
            }
            false
        }

        /// Delivers a wake token to every stall. Used at shutdown; returns
        /// the number of workers that were parked.
        pub fn wake_all(&self) -> usize {
            fence(Ordering::SeqCst);
            let mut woken = 0;
            for stall in self.stalls.iter() {
                if stall.state.swap(TOKEN, Ordering::AcqRel) == PARKED {
                    atomic_wait::wake_all(&stall.state);
                    woken += 1;
                }
            }
            woken
        }
    }
}

#[cfg(any(loom, feature = "shuttle"))]
mod condvar {
    use crate::platform::*;

    struct State {
        parked: usize,
        /// Wake tokens not yet claimed by a waking worker.
        tokens: usize,
    }

    pub(crate) struct Garage {
        state: Mutex<State>,
        wakeups: Condvar,
        max_parked: usize,
    }

    impl Garage {
        pub fn new(_workers: usize, max_parked: usize) -> Garage {
            Garage {
                state: Mutex::new(State {
                    parked: 0,
                    tokens: 0,
                }),
                wakeups: Condvar::new(),
                max_parked,
            }
        }

        /// The mutex stands in for the fence of the futex garage: wakers
        /// publish before taking the lock in `wake_one`, so once we hold it,
        /// either `should_wake` observes their work or they will observe us
        /// in `parked`.
        pub fn park<F: Fn() -> bool>(&self, _worker: usize, should_wake: F) -> bool {
            let mut state = self.state.lock().unwrap();
            if state.parked >= self.max_parked {
                return false;
            }
            if should_wake() {
                return false;
            }
            state.parked += 1;
            while state.tokens == 0 {
                state = self.wakeups.wait(state).unwrap();
            }
            state.tokens -= 1;
            state.parked -= 1;
            true
        }

        pub fn wake_one(&self) -> bool {
            let mut state = self.state.lock().unwrap();
            if state.parked > state.tokens {
                state.tokens += 1;
                self.wakeups.notify_one();
                true
            } else {
                false
            }
        }

        pub fn wake_all(&self) -> usize {
            let mut state = self.state.lock().unwrap();
            let woken = state.parked.saturating_sub(state.tokens);
            state.tokens = state.parked;
            self.wakeups.notify_all();
            woken
        }
    }
}
