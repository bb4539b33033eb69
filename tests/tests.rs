//! End-to-end tests of the runtime's public API.

use core::num::NonZeroUsize;
use core::panic::AssertUnwindSafe;
use core::sync::atomic::{AtomicU64, Ordering};
use std::panic::catch_unwind;

use weft::{Config, Runtime, SpawnError, Worker};

// -----------------------------------------------------------------------------
// Infrastructure

/// A runtime with a fixed worker count and otherwise default tuning.
fn runtime(workers: usize) -> Runtime {
    let mut config = Config::default();
    config.workers = NonZeroUsize::new(workers);
    Runtime::new(config)
}

/// The classic naive doubly-recursive benchmark function; every node of the
/// call tree is a join.
fn fib(worker: &Worker, n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let (a, b) = worker.join(|w| fib(w, n - 1), |w| fib(w, n - 2));
    a + b
}

/// Full binary tree of joins with a counter bump at every leaf.
fn count_leaves(worker: &Worker, depth: u32, hits: &AtomicU64) {
    if depth == 0 {
        hits.fetch_add(1, Ordering::Relaxed);
        return;
    }
    worker.join(
        |w| count_leaves(w, depth - 1, hits),
        |w| count_leaves(w, depth - 1, hits),
    );
}

// -----------------------------------------------------------------------------
// Fork-join basics

#[test]
fn sequential_execution_matches_the_recurrence() {
    let mut runtime = runtime(1);
    assert_eq!(runtime.run(|worker| fib(worker, 20)), 6765);
}

#[test]
fn parallel_execution_matches_the_recurrence() {
    let mut runtime = runtime(4);
    assert_eq!(runtime.run(|worker| fib(worker, 24)), 46368);
}

#[test]
fn every_leaf_runs_exactly_once() {
    let mut runtime = runtime(4);
    let hits = AtomicU64::new(0);
    runtime.run(|worker| count_leaves(worker, 12, &hits));
    assert_eq!(hits.load(Ordering::Relaxed), 1 << 12);
}

#[test]
fn no_worker_count_deadlocks() {
    for workers in 1..=8 {
        let mut runtime = runtime(workers);
        let hits = AtomicU64::new(0);
        runtime.run(|worker| count_leaves(worker, 8, &hits));
        assert_eq!(hits.load(Ordering::Relaxed), 1 << 8, "with {workers} workers");
    }
}

#[test]
fn a_runtime_is_reusable_across_runs() {
    let mut runtime = runtime(2);
    for n in [5, 10, 15] {
        let serial = {
            let mut memo = (0u64, 1u64);
            for _ in 0..n {
                memo = (memo.1, memo.0 + memo.1);
            }
            memo.0
        };
        assert_eq!(runtime.run(|worker| fib(worker, n)), serial);
    }
}

/// A million-leaf tree across 8 workers, three times over. The full
/// hundred-repetition soak of this shape lives in [`deep_tree_soak`];
/// three repetitions keep the default suite fast while still cycling the
/// pools through growth and reuse.
#[test]
fn deep_tree_stress() {
    let mut runtime = runtime(8);
    let hits = AtomicU64::new(0);
    for _ in 0..3 {
        hits.store(0, Ordering::Relaxed);
        runtime.run(|worker| count_leaves(worker, 20, &hits));
        assert_eq!(hits.load(Ordering::Relaxed), 1 << 20);
    }
}

/// One hundred repetitions of the depth-20 tree; run with `--ignored`
/// when touching the steal or garage machinery.
#[test]
#[ignore]
fn deep_tree_soak() {
    let mut runtime = runtime(8);
    for _ in 0..100 {
        let hits = AtomicU64::new(0);
        runtime.run(|worker| count_leaves(worker, 20, &hits));
        assert_eq!(hits.load(Ordering::Relaxed), 1 << 20);
    }
}

// -----------------------------------------------------------------------------
// Work conservation

#[test]
fn all_spawned_work_is_accounted_for() {
    let mut runtime = runtime(4);
    let hits = AtomicU64::new(0);
    runtime.run(|worker| count_leaves(worker, 14, &hits));
    let stats = runtime.shutdown();
    assert_eq!(hits.load(Ordering::Relaxed), 1 << 14);
    assert_eq!(stats.completed(), stats.spawned);
    assert_eq!(stats.synced, stats.spawned);
}

// -----------------------------------------------------------------------------
// Explicit spawn and sync

#[test]
fn spawned_tasks_resolve_in_reverse_order() {
    let mut runtime = runtime(2);
    let total = runtime.run(|worker| {
        let mut tasks = Vec::new();
        for i in 0..100u64 {
            tasks.push(worker.spawn(move |_: &Worker| i));
        }
        let mut total = 0;
        while let Some(task) = tasks.pop() {
            total += worker.sync(task);
        }
        total
    });
    assert_eq!(total, 4950);
}

#[test]
fn pool_exhaustion_is_reported() {
    // One block of 256 slots and no growth: the 257th spawn must fail.
    let mut config = Config::default();
    config.workers = NonZeroUsize::new(1);
    config.max_blocks = 1;
    let mut runtime = Runtime::new(config);
    runtime.run(|worker| {
        let mut tasks: Vec<_> = (0..256)
            .map(|_| worker.try_spawn(|_: &Worker| ()).unwrap())
            .collect();
        assert_eq!(
            worker.try_spawn(|_: &Worker| ()).map(|_| ()),
            Err(SpawnError::CapacityExceeded)
        );
        while let Some(task) = tasks.pop() {
            worker.sync(task);
        }
    });
}

#[test]
fn pool_exhaustion_panics_with_the_error_as_payload() {
    let mut config = Config::default();
    config.workers = NonZeroUsize::new(1);
    config.max_blocks = 1;
    let mut runtime = Runtime::new(config);
    runtime.run(|worker| {
        let mut tasks: Vec<_> = (0..256)
            .map(|_| worker.spawn(|_: &Worker| ()))
            .collect();
        let payload = catch_unwind(AssertUnwindSafe(|| {
            let _ = worker.spawn(|_: &Worker| ());
        }))
        .unwrap_err();
        assert_eq!(
            payload.downcast_ref::<SpawnError>(),
            Some(&SpawnError::CapacityExceeded)
        );
        while let Some(task) = tasks.pop() {
            worker.sync(task);
        }
    });
}

#[test]
fn out_of_order_sync_is_rejected() {
    let mut runtime = runtime(1);
    let caught = catch_unwind(AssertUnwindSafe(|| {
        runtime.run(|worker| {
            let first = worker.spawn(|_: &Worker| ());
            let _second = worker.spawn(|_: &Worker| ());
            worker.sync(first);
        })
    }));
    let payload = caught.unwrap_err();
    assert_eq!(
        payload.downcast_ref::<&str>(),
        Some(&"tasks must be synced in reverse spawn order")
    );
}

// -----------------------------------------------------------------------------
// Panic propagation

#[test]
fn left_panic_resumes_on_the_caller() {
    let mut runtime = runtime(2);
    let caught = catch_unwind(AssertUnwindSafe(|| {
        runtime.run(|worker| worker.join(|_| panic!("left side"), |_| 7))
    }));
    let payload = caught.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"left side"));
    // The panicking join still retired its spawned half, so the runtime
    // remains usable.
    assert_eq!(runtime.run(|worker| fib(worker, 10)), 55);
}

#[test]
fn right_panic_resumes_on_the_caller() {
    let mut runtime = runtime(2);
    let caught = catch_unwind(AssertUnwindSafe(|| {
        runtime.run(|worker| worker.join(|_| 7, |_| panic!("right side")))
    }));
    let payload = caught.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"right side"));
    assert_eq!(runtime.run(|worker| fib(worker, 10)), 55);
}

#[test]
fn the_first_panic_wins_a_double_panic() {
    let mut runtime = runtime(2);
    let caught = catch_unwind(AssertUnwindSafe(|| {
        runtime.run(|worker| {
            worker.join(
                |_| panic!("first panic"),
                |_| -> () { panic!("second panic") },
            )
        })
    }));
    let payload = caught.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"first panic"));
}

#[test]
fn a_spawned_panic_resumes_at_sync() {
    let mut runtime = runtime(1);
    runtime.run(|worker| {
        let task = worker.spawn(|_: &Worker| -> () { panic!("spawned panic") });
        let caught = catch_unwind(AssertUnwindSafe(|| worker.sync(task)));
        let payload = caught.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"spawned panic"));
    });
}

// -----------------------------------------------------------------------------
// Parallel loops

#[test]
fn for_range_visits_every_index_exactly_once() {
    let mut runtime = runtime(4);
    let visits: Vec<AtomicU64> = (0..10_000).map(|_| AtomicU64::new(0)).collect();
    runtime.run(|worker| {
        worker.for_range(0, 10_000, 32, &|_, index| {
            visits[index as usize].fetch_add(1, Ordering::Relaxed);
        });
    });
    assert!(visits.iter().all(|count| count.load(Ordering::Relaxed) == 1));
}

#[test]
fn for_range_handles_degenerate_ranges() {
    let mut runtime = runtime(2);
    runtime.run(|worker| {
        let hits = AtomicU64::new(0);
        let body = |_: &Worker, _: u64| {
            hits.fetch_add(1, Ordering::Relaxed);
        };
        worker.for_range(5, 5, 8, &body);
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        worker.for_range(9, 3, 8, &body);
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        // A zero grain is treated as one.
        worker.for_range(0, 10, 0, &body);
        assert_eq!(hits.load(Ordering::Relaxed), 10);
        // A grain wider than the range degenerates to a sequential loop.
        worker.for_range(0, 7, 100, &body);
        assert_eq!(hits.load(Ordering::Relaxed), 17);
    });
}

#[test]
fn for_range_sums_match_the_closed_form() {
    let mut runtime = runtime(4);
    let total = AtomicU64::new(0);
    runtime.run(|worker| {
        worker.for_range(0, 100_000, 128, &|_, index| {
            total.fetch_add(index, Ordering::Relaxed);
        });
    });
    assert_eq!(total.load(Ordering::Relaxed), 100_000 * 99_999 / 2);
}

// -----------------------------------------------------------------------------
// Accessors and configuration

#[test]
fn worker_accessors_report_the_runtime_shape() {
    let mut runtime = runtime(3);
    assert_eq!(runtime.num_workers(), 3);
    runtime.run(|worker| {
        assert_eq!(worker.index(), 0);
        assert_eq!(worker.num_workers(), 3);
    });
}

#[test]
fn config_reads_the_environment() {
    // SAFETY: This is the only test touching these variables, and it
    // restores them before returning.
    unsafe {
        std::env::set_var("WEFT_WORKERS", "3");
        std::env::set_var("WEFT_STEALABLE", "17");
        std::env::set_var("WEFT_CHUNK", "9");
        std::env::set_var("WEFT_STATS", "1");
        std::env::set_var("WEFT_LEAP", "junk");
    }
    let config = Config::from_env();
    // SAFETY: As above.
    unsafe {
        std::env::remove_var("WEFT_WORKERS");
        std::env::remove_var("WEFT_STEALABLE");
        std::env::remove_var("WEFT_CHUNK");
        std::env::remove_var("WEFT_STATS");
        std::env::remove_var("WEFT_LEAP");
    }
    assert_eq!(config.workers, NonZeroUsize::new(3));
    assert_eq!(config.stealable_window, Some(17));
    assert_eq!(config.publish_chunk, 9);
    assert!(config.emit_stats);
    // Unparsable values fall back to the default.
    assert_eq!(config.leap_threshold, Config::default().leap_threshold);
}

#[test]
fn stats_are_emitted_on_shutdown() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut config = Config::default();
    config.workers = NonZeroUsize::new(2);
    config.emit_stats = true;
    let mut runtime = Runtime::new(config);
    let hits = AtomicU64::new(0);
    runtime.run(|worker| count_leaves(worker, 6, &hits));
    let stats = runtime.shutdown();
    assert_eq!(stats.spawned, (1 << 6) - 1);
    assert_eq!(stats.completed(), stats.spawned);
}
