//! Task descriptors and the status protocol that synchronizes owners with
//! thieves.
//!
//! Every pending task lives in a fixed-size slot, the [`TaskDescriptor`]. A
//! descriptor stores the work payload inline (no per-task allocation), a
//! type-erased executor thunk, and two atomics: the [`StatusWord`] and the
//! steal serial number. The status word is the single source of truth for who
//! may touch the slot; all cross-thread handoffs of the payload are ordered
//! through it.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use std::thread;

use crate::platform::*;
use crate::unwind;
use crate::worker::Worker;

// -----------------------------------------------------------------------------
// Status words

/// Number of low bits used for the status tag.
pub const TAG_BITS: u32 = 3;
const TAG_MASK: usize = (1 << TAG_BITS) - 1;

const TAG_EMPTY: usize = 0;
const TAG_PRIVATE: usize = 1;
const TAG_STEALABLE: usize = 2;
const TAG_DONE: usize = 3;
const TAG_CLAIMED: usize = 4;

/// Number of bits of a `Claimed` word that hold the thief's worker index.
/// The rest of the payload bits hold the thief's return base.
pub const THIEF_BITS: u32 = 12;

/// Upper bound on the number of workers, imposed by the status encoding.
pub const MAX_WORKERS: usize = 1 << THIEF_BITS;
const THIEF_MASK: usize = MAX_WORKERS - 1;

/// Decoded state of a task slot.
///
/// The slot cycles through `Empty -> Private -> Empty` when the owner runs
/// the task itself, or `Empty -> Private -> Stealable -> Claimed -> Done ->
/// Empty` when a thief gets involved. `Stealable -> Private` (the owner
/// grabbing its own task back) and `Claimed -> Stealable` (a thief backing
/// out of a claim) are the only other legal transitions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    /// The slot holds no task.
    Empty,
    /// The slot holds a task only the owner may run.
    Private,
    /// The slot holds a task any worker may claim.
    Stealable,
    /// A thief has claimed the task and is running it. The payload identifies
    /// the thief and records where on the thief's own pool the theft happened.
    Claimed(ThiefInfo),
    /// A thief finished the task; the slot holds the result.
    Done,
}

/// Payload of a [`Status::Claimed`] word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ThiefInfo {
    /// Index of the worker running the task.
    pub thief: usize,
    /// The thief's pool top at the moment of the claim. Tasks the thief
    /// spawns while running this task all live at or above this index, which
    /// lets a waiting owner distinguish descendants of its stolen task from
    /// the thief's unrelated work.
    pub base: usize,
}

impl Status {
    #[inline(always)]
    fn pack(self) -> usize {
        match self {
            Status::Empty => TAG_EMPTY,
            Status::Private => TAG_PRIVATE,
            Status::Stealable => TAG_STEALABLE,
            Status::Done => TAG_DONE,
            Status::Claimed(info) => {
                debug_assert!(info.thief < MAX_WORKERS);
                debug_assert!(info.base < 1 << (usize::BITS - THIEF_BITS - TAG_BITS));
                (((info.base << THIEF_BITS) | info.thief) << TAG_BITS) | TAG_CLAIMED
            }
        }
    }

    #[inline(always)]
    fn unpack(word: usize) -> Status {
        let payload = word >> TAG_BITS;
        match word & TAG_MASK {
            TAG_EMPTY => Status::Empty,
            TAG_PRIVATE => Status::Private,
            TAG_STEALABLE => Status::Stealable,
            TAG_DONE => Status::Done,
            TAG_CLAIMED => Status::Claimed(ThiefInfo {
                thief: payload & THIEF_MASK,
                base: payload >> THIEF_BITS,
            }),
            _ => corrupt_status(word),
        }
    }
}

#[cold]
#[inline(never)]
fn corrupt_status(word: usize) -> ! {
    panic!("corrupt task status word {word:#x}");
}

/// A task slot's status, packed into a single atomic word.
///
/// Packing the tag and the claim payload together means every state
/// transition is one atomic operation, and a compare-exchange on the word
/// doubles as a check that nobody else transitioned the slot in the
/// meantime.
pub struct StatusWord {
    word: AtomicUsize,
}

impl StatusWord {
    pub fn new(status: Status) -> StatusWord {
        StatusWord {
            word: AtomicUsize::new(status.pack()),
        }
    }

    #[inline(always)]
    pub fn load(&self, order: Ordering) -> Status {
        Status::unpack(self.word.load(order))
    }

    #[inline(always)]
    pub fn store(&self, status: Status, order: Ordering) {
        self.word.store(status.pack(), order);
    }

    /// Transitions `current -> new` if nobody got there first, returning the
    /// actually-observed status on failure.
    #[inline(always)]
    pub fn compare_exchange(
        &self,
        current: Status,
        new: Status,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Status, Status> {
        self.word
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(Status::unpack)
            .map_err(Status::unpack)
    }
}

// -----------------------------------------------------------------------------
// Work

/// A unit of work that can be spawned onto a worker's task pool.
///
/// This is implemented for all closures of the form
/// `FnOnce(&Worker) -> R + Send`, which is the only form most callers ever
/// need. Implementing it by hand is useful when the payload is a named type,
/// for instance to keep it small enough to store inline.
pub trait Work: Send {
    /// The value produced by running this work.
    type Output: Send;

    /// Runs the work. The provided worker is the one actually executing it,
    /// which may not be the worker it was spawned on.
    fn run(self, worker: &Worker) -> Self::Output;
}

impl<F, R> Work for F
where
    F: FnOnce(&Worker) -> R + Send,
    R: Send,
{
    type Output = R;

    #[inline(always)]
    fn run(self, worker: &Worker) -> R {
        self(worker)
    }
}

// -----------------------------------------------------------------------------
// Task descriptors

/// Number of payload bytes available in a task slot.
pub const TASK_PAYLOAD: usize = 80;

/// Guaranteed alignment of the payload area.
pub const PAYLOAD_ALIGN: usize = 16;

/// Type-erased executor for a claimed task. Stored alongside the payload so
/// thieves can run tasks without knowing their concrete type.
pub type ExecuteFn = unsafe fn(NonNull<TaskDescriptor>, &Worker);

#[repr(align(16))]
struct Payload(UnsafeCell<MaybeUninit<[u8; TASK_PAYLOAD]>>);

/// A slot in a worker's task pool.
///
/// The payload area does double duty: between spawn and execution it holds
/// the `Work` value, and after a thief completes the task it holds a
/// `thread::Result` of the output (capturing any panic so the owner can
/// resume it). Both uses are guarded by the status word:
///
/// + The owner may touch the payload while the status is `Private`, or after
///   winning a `Stealable -> Private` transition, or once it is `Done`.
/// + A thief may touch the payload only between winning a `Stealable ->
///   Claimed` transition and publishing `Done` (or backing out to
///   `Stealable`).
///
/// Descriptors are aligned to the cache line so that the owner hammering on
/// one slot never contends with thieves scanning its neighbor.
#[repr(C)]
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(
    any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
    ),
    repr(align(128))
)]
#[cfg_attr(
    not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips32r6",
        target_arch = "mips64",
        target_arch = "mips64r6",
        target_arch = "sparc",
        target_arch = "hexagon",
        target_arch = "m68k",
        target_arch = "s390x",
    )),
    repr(align(64))
)]
#[cfg_attr(
    any(
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips32r6",
        target_arch = "mips64",
        target_arch = "mips64r6",
        target_arch = "sparc",
        target_arch = "hexagon",
    ),
    repr(align(32))
)]
#[cfg_attr(target_arch = "m68k", repr(align(16)))]
pub struct TaskDescriptor {
    status: StatusWord,
    /// Steal serial number, bumped once per committed claim of this slot.
    /// Distinguishes a recycled slot from a never-stolen one in debug
    /// checks and post-mortems.
    ssn: AtomicU64,
    execute_fn: UnsafeCell<MaybeUninit<ExecuteFn>>,
    payload: Payload,
}

// The alignment table above must stay in lockstep with the padding table in
// `util`.
const _: () = assert!(align_of::<TaskDescriptor>() == crate::util::CACHE_LINE_SIZE);

// SAFETY: The `UnsafeCell` fields are accessed under the ownership discipline
// described on the struct; the status word's orderings publish the contents
// across threads. Nothing in a descriptor is tied to a particular thread.
unsafe impl Sync for TaskDescriptor {}
// SAFETY: As above; descriptors are only ever sent as part of freeing a pool.
unsafe impl Send for TaskDescriptor {}

impl TaskDescriptor {
    pub fn new() -> TaskDescriptor {
        TaskDescriptor {
            status: StatusWord::new(Status::Empty),
            ssn: AtomicU64::new(0),
            execute_fn: UnsafeCell::new(MaybeUninit::uninit()),
            payload: Payload(UnsafeCell::new(MaybeUninit::uninit())),
        }
    }

    #[inline(always)]
    pub fn status(&self) -> &StatusWord {
        &self.status
    }

    #[inline(always)]
    pub fn ssn(&self) -> &AtomicU64 {
        &self.ssn
    }

    /// Stores a work payload and its executor thunk into the slot.
    ///
    /// The payload capacity is checked at compile time, so an oversized
    /// `Work` type fails the build rather than the run.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive ownership of the slot (it spawned into
    /// an `Empty` slot that no other thread can observe yet). The write is
    /// published to other threads by the caller's subsequent status store.
    #[inline(always)]
    pub unsafe fn write_work<W: Work>(&self, work: W) {
        const {
            assert!(
                size_of::<W>() <= TASK_PAYLOAD,
                "work payload exceeds the task slot capacity; box the captures",
            );
            assert!(
                align_of::<W>() <= PAYLOAD_ALIGN,
                "work payload is over-aligned for a task slot",
            );
            assert!(
                size_of::<thread::Result<W::Output>>() <= TASK_PAYLOAD,
                "work output exceeds the task slot capacity; box the result",
            );
            assert!(
                align_of::<thread::Result<W::Output>>() <= PAYLOAD_ALIGN,
                "work output is over-aligned for a task slot",
            );
        }

        // SAFETY: Exclusive ownership per the caller's contract, and the
        // const block above proves the payload fits.
        unsafe {
            (*self.payload.0.get()).as_mut_ptr().cast::<W>().write(work);
            (*self.execute_fn.get()).write(execute_erased::<W>);
        }
    }

    /// Moves the work payload back out of the slot.
    ///
    /// # Safety
    ///
    /// The slot must hold a `W` stored by [`write_work`](Self::write_work),
    /// and the caller must own the slot (it is the owner with the slot
    /// `Private`, or a thief that won the claim).
    #[inline(always)]
    pub unsafe fn take_work<W: Work>(&self) -> W {
        // SAFETY: Per the caller's contract.
        unsafe { (*self.payload.0.get()).as_ptr().cast::<W>().read() }
    }

    /// Reads the executor thunk stored by [`write_work`](Self::write_work).
    ///
    /// # Safety
    ///
    /// The caller must have claimed the task, which also guarantees the
    /// thunk was initialized and published.
    #[inline(always)]
    pub unsafe fn execute_fn(&self) -> ExecuteFn {
        // SAFETY: Per the caller's contract.
        unsafe { (*self.execute_fn.get()).assume_init() }
    }

    /// Moves a completed task's result out of the slot.
    ///
    /// # Safety
    ///
    /// The slot's status must be `Done`, observed with `Acquire` so the
    /// thief's result write is visible, and the task must have been spawned
    /// as a `W`.
    #[inline(always)]
    pub unsafe fn take_result<W: Work>(&self) -> thread::Result<W::Output> {
        // SAFETY: Per the caller's contract.
        unsafe {
            (*self.payload.0.get())
                .as_ptr()
                .cast::<thread::Result<W::Output>>()
                .read()
        }
    }

    /// # Safety
    ///
    /// The caller must have claimed the task and already consumed the work
    /// payload with [`take_work`](Self::take_work).
    #[inline(always)]
    unsafe fn write_result<W: Work>(&self, result: thread::Result<W::Output>) {
        // SAFETY: Per the caller's contract; `write_work` proved the result
        // fits when the task was spawned.
        unsafe {
            (*self.payload.0.get())
                .as_mut_ptr()
                .cast::<thread::Result<W::Output>>()
                .write(result);
        }
    }
}

/// Runs a claimed task of concrete type `W` and stores its result back into
/// the slot. This is the function [`write_work`](TaskDescriptor::write_work)
/// erases into the descriptor.
///
/// Panics raised by the work are captured into the stored result rather than
/// unwinding through the thief, so the owner can resume them at its sync
/// point.
///
/// # Safety
///
/// The caller must have claimed the task, and the task must have been
/// spawned as a `W`. The stored result is published by the caller's
/// subsequent `Done` store.
pub unsafe fn execute_erased<W: Work>(task: NonNull<TaskDescriptor>, worker: &Worker) {
    // SAFETY: A claimed task's descriptor stays alive until the claim is
    // resolved, and a claim grants payload ownership.
    let work = unsafe { task.as_ref().take_work::<W>() };
    let result = unwind::halt_unwinding(|| work.run(worker));
    // SAFETY: Still claimed; the payload was consumed just above.
    unsafe { task.as_ref().write_result::<W>(result) };
}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;

    #[test]
    fn status_packing_round_trips() {
        let cases = [
            Status::Empty,
            Status::Private,
            Status::Stealable,
            Status::Done,
            Status::Claimed(ThiefInfo { thief: 0, base: 0 }),
            Status::Claimed(ThiefInfo {
                thief: MAX_WORKERS - 1,
                base: 0,
            }),
            Status::Claimed(ThiefInfo {
                thief: 17,
                base: 123_456,
            }),
        ];
        for status in cases {
            assert_eq!(Status::unpack(status.pack()), status);
        }
    }

    #[test]
    fn compare_exchange_reports_observed_status() {
        let word = StatusWord::new(Status::Private);
        let failure = word.compare_exchange(
            Status::Stealable,
            Status::Claimed(ThiefInfo { thief: 1, base: 2 }),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        assert_eq!(failure, Err(Status::Private));

        word.store(Status::Stealable, Ordering::Relaxed);
        let success = word.compare_exchange(
            Status::Stealable,
            Status::Claimed(ThiefInfo { thief: 1, base: 2 }),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        assert_eq!(success, Ok(Status::Stealable));
        assert_eq!(
            word.load(Ordering::Relaxed),
            Status::Claimed(ThiefInfo { thief: 1, base: 2 })
        );
    }

    #[test]
    fn payload_round_trips_through_a_slot() {
        let slot = TaskDescriptor::new();
        struct Carrier([u64; 4]);
        impl Work for Carrier {
            type Output = u64;
            fn run(self, _worker: &Worker) -> u64 {
                self.0.iter().sum()
            }
        }
        // SAFETY: The slot is local to this test, so we own it outright.
        unsafe {
            slot.write_work(Carrier([1, 2, 3, 4]));
            let work = slot.take_work::<Carrier>();
            assert_eq!(work.0, [1, 2, 3, 4]);
        }
    }
}
