//! A benchmark for flat data-parallel loops, summing a hashed index range.

use core::sync::atomic::{AtomicU64, Ordering};

use divan::Bencher;
use rayon::prelude::*;
use weft::{Config, Runtime};

// -----------------------------------------------------------------------------
// Workload

/// Finalizer from splitmix64. Cheap enough that scheduling overhead shows,
/// expensive enough that the compiler cannot fold the loop away.
fn scramble(i: u64) -> u64 {
    let mut x = i.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

const LENS: &[u64] = &[1 << 12, 1 << 16, 1 << 20, 1 << 22];

/// Elements summed serially per task; the atomic accumulator is touched
/// once per chunk, not once per element.
const CHUNK: u64 = 1024;

fn chunk_sum(chunk: u64, len: u64) -> u64 {
    let lo = chunk * CHUNK;
    let hi = ((chunk + 1) * CHUNK).min(len);
    (lo..hi).map(scramble).fold(0u64, u64::wrapping_add)
}

// -----------------------------------------------------------------------------
// Benchmarks

#[divan::bench(args = LENS)]
fn baseline(bencher: Bencher, len: u64) {
    let expected = (0..len).map(scramble).fold(0u64, u64::wrapping_add);

    bencher.bench_local(move || {
        let total = (0..len).map(scramble).fold(0u64, u64::wrapping_add);
        assert_eq!(total, expected);
    });
}

#[divan::bench(args = LENS)]
fn weft(bencher: Bencher, len: u64) {
    let expected = (0..len).map(scramble).fold(0u64, u64::wrapping_add);
    let chunks = len.div_ceil(CHUNK);
    let mut runtime = Runtime::new(Config::default());

    bencher.bench_local(move || {
        let total = AtomicU64::new(0);
        runtime.run(|worker| {
            worker.for_range(0, chunks, 4, &|_, chunk| {
                total.fetch_add(chunk_sum(chunk, len), Ordering::Relaxed);
            });
        });
        assert_eq!(total.load(Ordering::Relaxed), expected);
    });
}

#[divan::bench(args = LENS)]
fn rayon(bencher: Bencher, len: u64) {
    let expected = (0..len).map(scramble).fold(0u64, u64::wrapping_add);
    let chunks = len.div_ceil(CHUNK);

    bencher.bench_local(move || {
        let total = (0..chunks)
            .into_par_iter()
            .map(|chunk| chunk_sum(chunk, len))
            .reduce(|| 0, u64::wrapping_add);
        assert_eq!(total, expected);
    });
}

fn main() {
    divan::main();
}
