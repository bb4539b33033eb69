//! Error types surfaced by the fallible parts of the public API.

use core::error::Error;
use core::fmt;

/// Error returned by [`Worker::try_spawn`](crate::Worker::try_spawn) when a
/// task cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpawnError {
    /// The worker's task pool is full and has already grown to the block
    /// limit configured by [`Config::max_blocks`](crate::Config::max_blocks).
    ///
    /// A pool with the default limit holds on the order of 65 thousand
    /// pending tasks per worker, so hitting this generally indicates either
    /// unbounded recursion or a deliberately small limit.
    CapacityExceeded,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::CapacityExceeded => {
                write!(f, "task pool is full and cannot grow further")
            }
        }
    }
}

impl Error for SpawnError {}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        let message = alloc::format!("{}", SpawnError::CapacityExceeded);
        assert!(message.contains("full"));
    }
}
