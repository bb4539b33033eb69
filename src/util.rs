//! Small shared utilities: the victim-selection RNG and cache-line padding.

use core::cell::Cell;
use core::hash::Hasher;
use core::ops::Deref;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::hash::DefaultHasher;

// -----------------------------------------------------------------------------
// Pseudorandom number generation

/// [xorshift*] is a fast pseudorandom number generator which will
/// even tolerate weak seeding, as long as it's not zero.
///
/// [xorshift*]: https://en.wikipedia.org/wiki/Xorshift#xorshift*
#[cfg(not(feature = "shuttle"))]
pub struct XorShift64Star {
    state: Cell<u64>,
}

#[cfg(not(feature = "shuttle"))]
impl XorShift64Star {
    pub fn new() -> Self {
        // Any non-zero seed will do -- this uses the hash of a global counter.
        let mut seed = 0;
        while seed == 0 {
            let mut hasher = DefaultHasher::new();
            static COUNTER: AtomicUsize = AtomicUsize::new(0);
            hasher.write_usize(COUNTER.fetch_add(1, Ordering::Relaxed));
            seed = hasher.finish();
        }

        XorShift64Star {
            state: Cell::new(seed),
        }
    }

    #[allow(dead_code)]
    pub fn from_seed(seed: u64) -> Self {
        XorShift64Star {
            state: Cell::new(seed),
        }
    }

    fn next(&self) -> u64 {
        let mut x = self.state.get();
        debug_assert_ne!(x, 0);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.set(x);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Return a value from `0..n`.
    pub fn next_usize(&self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

#[cfg(feature = "shuttle")]
pub struct XorShift64Star;

#[cfg(feature = "shuttle")]
impl XorShift64Star {
    pub fn new() -> Self {
        Self
    }

    #[allow(dead_code)]
    pub fn from_seed(_seed: u64) -> Self {
        Self
    }

    pub fn next_usize(&self, n: usize) -> usize {
        use shuttle::rand::Rng;
        use shuttle::rand::thread_rng;

        thread_rng().gen_range(0..n)
    }
}

// -----------------------------------------------------------------------------
// Cache-line padding

// This uses the same alignment table as `CachePadded` in crossbeam.
#[cfg(target_arch = "s390x")]
pub const CACHE_LINE_SIZE: usize = 256;
#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "powerpc64",
))]
pub const CACHE_LINE_SIZE: usize = 128;
#[cfg(not(any(
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
)))]
pub const CACHE_LINE_SIZE: usize = 64;
#[cfg(any(
    target_arch = "arm",
    target_arch = "mips",
    target_arch = "mips32r6",
    target_arch = "mips64",
    target_arch = "mips64r6",
    target_arch = "sparc",
    target_arch = "hexagon",
))]
pub const CACHE_LINE_SIZE: usize = 32;
#[cfg(target_arch = "m68k")]
pub const CACHE_LINE_SIZE: usize = 16;

/// Aligns the wrapped value to the platform cache line size, so that fields
/// written by different threads never share a line.
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
#[derive(Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub fn new(value: T) -> CachePadded<T> {
        CachePadded { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}
