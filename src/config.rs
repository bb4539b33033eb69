//! Runtime construction parameters.
//!
//! Every tunable has a documented default, and all of them can be overridden
//! from the environment through [`Config::from_env`] using `WEFT_*`
//! variables. The runtime resolves a `Config` into a fully-concrete
//! [`Tuning`] once, at startup.

use core::num::NonZeroUsize;
use core::str::FromStr;

use crate::platform;
use crate::pool::MAX_POOL_BLOCKS;
use crate::task::MAX_WORKERS;

/// Construction parameters for a [`Runtime`](crate::Runtime).
///
/// The defaults are tuned for fine-grained fork-join workloads and are a
/// sensible starting point on anything from a laptop to a large NUMA box.
/// Build one with [`Config::default`] and adjust fields directly, or start
/// from [`Config::from_env`] to let deployment environments tune a binary
/// without recompiling.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// Number of workers, including the caller thread acting as worker 0.
    /// `None` uses the available parallelism of the host. Values above the
    /// encoding limit of the steal protocol (4096) are clamped.
    pub workers: Option<NonZeroUsize>,
    /// Target depth of each worker's stealable region. `None` derives a
    /// depth from the worker count: zero for a single worker, otherwise
    /// 3 plus 2 per doubling of workers, reduced by a quarter.
    pub stealable_window: Option<usize>,
    /// Upper bound on descriptors made stealable in one publish step.
    pub publish_chunk: usize,
    /// Number of top-most spawns always kept private.
    pub steal_margin: usize,
    /// Grabbed-but-never-stolen syncs tolerated before the worker starts
    /// privatizing its stealable region.
    pub unstolen_budget: u32,
    /// Busy-wait iterations after a fruitless scan of all victims.
    pub backoff_spins: u32,
    /// Fruitless scan rounds between yields of the processor.
    pub yield_interval: u32,
    /// Fruitless scan rounds before a worker parks in the garage.
    pub park_interval: u32,
    /// Cap on simultaneously parked workers, so some thieves stay hot while
    /// work may still appear. `None` uses a quarter of the workers plus one.
    pub max_parked: Option<usize>,
    /// Victims polled for depth before each committed steal attempt. `None`
    /// uses the square root of the worker count, rounded up.
    pub sample_width: Option<usize>,
    /// Scan rounds between re-shuffles of the victim table. `1` makes victim
    /// selection effectively random every round.
    pub rescan_interval: u32,
    /// Initial number of failed steal-back attempts tolerated before a
    /// blocked worker starts a transitive leapfrog walk. Adapts at runtime:
    /// it shrinks when steal-backs succeed and grows (capped) when a walk is
    /// triggered.
    pub leap_threshold: u32,
    /// Maximum blocks per task pool. Blocks double in size, starting at 256
    /// slots, so the default of 8 bounds each pool at 65 280 pending tasks.
    pub max_blocks: usize,
    /// Log aggregated counters when the runtime shuts down.
    pub emit_stats: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            workers: None,
            stealable_window: None,
            publish_chunk: 4,
            steal_margin: 1,
            unstolen_budget: 500,
            backoff_spins: 960,
            yield_interval: 10_000,
            park_interval: 100_000,
            max_parked: None,
            sample_width: None,
            rescan_interval: 40,
            leap_threshold: 30,
            max_blocks: 8,
            emit_stats: false,
        }
    }
}

impl Config {
    /// Builds a config from the defaults plus any `WEFT_*` environment
    /// overrides: `WEFT_WORKERS`, `WEFT_STEALABLE`, `WEFT_CHUNK`,
    /// `WEFT_MARGIN`, `WEFT_UNSTOLEN`, `WEFT_BACKOFF`, `WEFT_YIELD`,
    /// `WEFT_PARK`, `WEFT_MAX_PARKED`, `WEFT_SAMPLE`, `WEFT_RESCAN`,
    /// `WEFT_LEAP`, `WEFT_BLOCKS` and `WEFT_STATS`.
    ///
    /// Unparsable values are logged and ignored. `WEFT_WORKERS=0` means
    /// "use the available parallelism".
    pub fn from_env() -> Config {
        let mut config = Config::default();
        if let Some(workers) = parse_env::<usize>("WEFT_WORKERS") {
            config.workers = NonZeroUsize::new(workers);
        }
        if let Some(window) = parse_env("WEFT_STEALABLE") {
            config.stealable_window = Some(window);
        }
        if let Some(chunk) = parse_env("WEFT_CHUNK") {
            config.publish_chunk = chunk;
        }
        if let Some(margin) = parse_env("WEFT_MARGIN") {
            config.steal_margin = margin;
        }
        if let Some(budget) = parse_env("WEFT_UNSTOLEN") {
            config.unstolen_budget = budget;
        }
        if let Some(spins) = parse_env("WEFT_BACKOFF") {
            config.backoff_spins = spins;
        }
        if let Some(interval) = parse_env("WEFT_YIELD") {
            config.yield_interval = interval;
        }
        if let Some(interval) = parse_env("WEFT_PARK") {
            config.park_interval = interval;
        }
        if let Some(cap) = parse_env("WEFT_MAX_PARKED") {
            config.max_parked = Some(cap);
        }
        if let Some(width) = parse_env("WEFT_SAMPLE") {
            config.sample_width = Some(width);
        }
        if let Some(interval) = parse_env("WEFT_RESCAN") {
            config.rescan_interval = interval;
        }
        if let Some(threshold) = parse_env("WEFT_LEAP") {
            config.leap_threshold = threshold;
        }
        if let Some(blocks) = parse_env("WEFT_BLOCKS") {
            config.max_blocks = blocks;
        }
        if let Some(flag) = parse_env_flag("WEFT_STATS") {
            config.emit_stats = flag;
        }
        config
    }
}

fn parse_env<T: FromStr>(name: &'static str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(name, value = %value, "ignoring unparsable environment override");
            None
        }
    }
}

fn parse_env_flag(name: &'static str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    Some(value != "0" && !value.eq_ignore_ascii_case("false"))
}

// -----------------------------------------------------------------------------
// Resolved tuning

/// A [`Config`] with every optional field resolved and every bound applied.
/// Owned by the runtime; read-only after construction.
pub(crate) struct Tuning {
    pub workers: usize,
    pub stealable_window: usize,
    pub publish_chunk: usize,
    pub steal_margin: usize,
    pub unstolen_budget: u32,
    pub backoff_spins: u32,
    pub yield_interval: u32,
    pub park_interval: u32,
    pub max_parked: usize,
    pub sample_width: usize,
    pub rescan_interval: u32,
    pub leap_threshold: u32,
    pub max_blocks: usize,
    pub emit_stats: bool,
}

impl Tuning {
    pub fn resolve(config: &Config) -> Tuning {
        let workers = config
            .workers
            .map(NonZeroUsize::get)
            .unwrap_or_else(platform::available_parallelism)
            .min(MAX_WORKERS);
        Tuning {
            workers,
            stealable_window: config
                .stealable_window
                .unwrap_or_else(|| default_window(workers)),
            publish_chunk: config.publish_chunk.max(1),
            steal_margin: config.steal_margin,
            unstolen_budget: config.unstolen_budget.max(1),
            backoff_spins: config.backoff_spins,
            yield_interval: config.yield_interval.max(1),
            park_interval: config.park_interval.max(1),
            max_parked: config.max_parked.unwrap_or(workers / 4 + 1).min(workers),
            sample_width: config.sample_width.unwrap_or_else(|| isqrt_ceil(workers)).max(1),
            rescan_interval: config.rescan_interval.max(1),
            leap_threshold: config.leap_threshold.max(1),
            max_blocks: config.max_blocks.clamp(1, MAX_POOL_BLOCKS),
            emit_stats: config.emit_stats,
        }
    }
}

/// Default stealable-window depth for a worker count.
fn default_window(workers: usize) -> usize {
    if workers <= 1 {
        return 0;
    }
    let window = 3 + 2 * workers.ilog2() as usize;
    window - window / 4
}

fn isqrt_ceil(n: usize) -> usize {
    let root = n.isqrt();
    if root * root < n { root + 1 } else { root }
}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;

    #[test]
    fn window_defaults_track_worker_count() {
        assert_eq!(default_window(1), 0);
        assert_eq!(default_window(2), 4);
        assert_eq!(default_window(4), 6);
        assert_eq!(default_window(8), 7);
        assert_eq!(default_window(16), 9);
        assert_eq!(default_window(64), 12);
    }

    #[test]
    fn resolve_applies_bounds() {
        let mut config = Config::default();
        config.workers = NonZeroUsize::new(1_000_000);
        config.max_blocks = 0;
        config.publish_chunk = 0;
        config.sample_width = Some(0);
        let tuning = Tuning::resolve(&config);
        assert_eq!(tuning.workers, MAX_WORKERS);
        assert_eq!(tuning.max_blocks, 1);
        assert_eq!(tuning.publish_chunk, 1);
        assert_eq!(tuning.sample_width, 1);
        assert!(tuning.max_parked <= tuning.workers);
    }

    #[test]
    fn sample_width_default_is_sqrt() {
        assert_eq!(isqrt_ceil(1), 1);
        assert_eq!(isqrt_ceil(4), 2);
        assert_eq!(isqrt_ceil(5), 3);
        assert_eq!(isqrt_ceil(16), 4);
    }
}
