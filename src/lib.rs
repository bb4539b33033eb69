//! A fork-join task runtime built on work-stealing with leapfrogging.
//!
//! Weft is for fine-grained task parallelism: workloads shaped like "spawn
//! a child task, keep working, then wait for it", nested millions deep and
//! wide. The central bet is that almost every spawned task is ultimately
//! run by the worker that spawned it, so those two operations must cost
//! about as much as a function call: a spawn is two plain stores into a
//! slot of the worker's own task pool, and a sync usually takes the task
//! straight back out with no atomic read-modify-write at all.
//!
//! Parallelism happens at the edges. Each worker's pool is split into a
//! private region and a small stealable window that the owner refills in
//! batches; idle workers sample other pools' apparent depth and steal from
//! the deepest, oldest end. A worker that syncs a task some thief ran off
//! with does not idle: it *leapfrogs*, stealing back pieces of the very
//! subtree it is waiting on from the thief (or, transitively, from the
//! thief's thieves), which keeps every core on useful work and bounds pool
//! growth while blocked.
//!
//! # Acknowledgments
//!
//! The split task pool and its claim protocol follow the design of the Lace
//! runtime; leapfrogging at sync points goes back to Wagner and Calder's
//! work on nested parallelism. The crate layout and a good deal of the
//! testing approach take after `rayon-core`.

#![no_std]
#![cfg_attr(any(loom, feature = "shuttle"), allow(dead_code))]
#![cfg_attr(any(loom, feature = "shuttle"), allow(unused_imports))]

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod compile_fail;
mod config;
mod counters;
mod error;
mod garage;
mod pool;
mod runtime;
mod scheduler;
mod steal;
mod task;
mod unwind;
mod util;
mod worker;

// -----------------------------------------------------------------------------
// Top-level exports

pub use config::Config;
pub use counters::Stats;
pub use error::SpawnError;
pub use runtime::Runtime;
pub use task::MAX_WORKERS;
pub use task::PAYLOAD_ALIGN;
pub use task::TASK_PAYLOAD;
pub use task::Work;
pub use worker::Spawned;
pub use worker::Worker;

// -----------------------------------------------------------------------------
// Platform support

// This crate can be checked with `loom` (--cfg loom) and tested under
// `shuttle` (--features shuttle), both of which require mocking the core
// threading primitives. All the important types and a few thread helpers
// are therefore re-exported through the `platform` module, with one branch
// per backend.

#[cfg(not(any(loom, feature = "shuttle")))]
mod platform {

    // Core exports

    pub use alloc::sync::Arc;
    pub use core::sync::atomic::AtomicBool;
    pub use core::sync::atomic::AtomicPtr;
    pub use core::sync::atomic::AtomicU32;
    pub use core::sync::atomic::AtomicU64;
    pub use core::sync::atomic::AtomicUsize;
    pub use core::sync::atomic::Ordering;
    pub use core::sync::atomic::fence;
    pub use std::sync::Condvar;
    pub use std::sync::Mutex;
    pub use std::thread::JoinHandle;
    pub use std::thread::yield_now;

    // Thread helpers

    pub fn spawn_named<F>(name: alloc::string::String, f: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        std::thread::Builder::new()
            .name(name)
            .spawn(f)
            .expect("failed to spawn a worker thread")
    }

    pub fn available_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(|workers| workers.get())
            .unwrap_or(1)
    }

    /// Polite busy-wait pause.
    #[inline(always)]
    pub fn relax() {
        core::hint::spin_loop();
    }
}

#[cfg(loom)]
mod platform {

    // Core exports

    pub use loom::sync::Arc;
    pub use loom::sync::Condvar;
    pub use loom::sync::Mutex;
    pub use loom::sync::atomic::AtomicBool;
    pub use loom::sync::atomic::AtomicPtr;
    pub use loom::sync::atomic::AtomicU32;
    pub use loom::sync::atomic::AtomicU64;
    pub use loom::sync::atomic::AtomicUsize;
    pub use loom::sync::atomic::Ordering;
    pub use loom::sync::atomic::fence;
    pub use loom::thread::JoinHandle;
    pub use loom::thread::yield_now;

    // Thread helpers

    pub fn spawn_named<F>(name: alloc::string::String, f: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = name;
        loom::thread::spawn(f)
    }

    /// Loom models want the smallest interesting worker count, not the
    /// host's.
    pub fn available_parallelism() -> usize {
        2
    }

    /// Every pause must be a modeled yield or loom will explore unbounded
    /// spin schedules.
    pub fn relax() {
        loom::thread::yield_now();
    }
}

#[cfg(all(feature = "shuttle", not(loom)))]
mod platform {

    // Core exports

    // Shuttle does not model pointer atomics; the arena's block table uses
    // real ones, which shuttle tolerates (it simply cannot reorder them).
    pub use core::sync::atomic::AtomicPtr;
    pub use shuttle::sync::Arc;
    pub use shuttle::sync::Condvar;
    pub use shuttle::sync::Mutex;
    pub use shuttle::sync::atomic::AtomicBool;
    pub use shuttle::sync::atomic::AtomicU32;
    pub use shuttle::sync::atomic::AtomicU64;
    pub use shuttle::sync::atomic::AtomicUsize;
    pub use shuttle::sync::atomic::Ordering;
    pub use shuttle::thread::JoinHandle;
    pub use shuttle::thread::yield_now;

    // Thread helpers

    pub fn spawn_named<F>(name: alloc::string::String, f: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        shuttle::thread::Builder::new()
            .name(name)
            .spawn(f)
            .expect("failed to spawn a worker thread")
    }

    pub fn available_parallelism() -> usize {
        panic!("available_parallelism does not work on shuttle");
    }

    pub fn relax() {
        shuttle::thread::yield_now();
    }
}
