//! Growable task-pool storage.
//!
//! Each worker owns an [`Arena`]: a short array of block pointers, where
//! block `b` holds `256 << b` descriptors. Doubling blocks mean a pool
//! reaches tens of thousands of slots in a handful of allocations, while a
//! logical index maps to its block with nothing but leading-zero arithmetic,
//! so neither the owner's hot paths nor thieves ever chase a linked
//! structure.
//!
//! Blocks are allocated lazily by the owner, published with a release store,
//! and stay allocated (contents recycled) until the runtime is torn down.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::error::SpawnError;
use crate::platform::*;
use crate::task::TaskDescriptor;

/// Size of block 0. Must be a power of two.
pub(crate) const FIRST_BLOCK_SIZE: usize = 256;
const FIRST_BLOCK_LOG: u32 = FIRST_BLOCK_SIZE.trailing_zeros();

/// Hard cap on blocks per pool; [`Config::max_blocks`](crate::Config) may
/// only lower it. Twelve doubling blocks put the absolute pool bound just
/// above a million slots.
pub(crate) const MAX_POOL_BLOCKS: usize = 12;

/// Block containing logical index `index`.
#[inline(always)]
pub(crate) fn block_of(index: usize) -> usize {
    ((index + FIRST_BLOCK_SIZE).ilog2() - FIRST_BLOCK_LOG) as usize
}

/// First logical index of `block`.
#[inline(always)]
pub(crate) fn block_first(block: usize) -> usize {
    (FIRST_BLOCK_SIZE << block) - FIRST_BLOCK_SIZE
}

/// Number of slots in `block`.
#[inline(always)]
pub(crate) fn block_len(block: usize) -> usize {
    FIRST_BLOCK_SIZE << block
}

/// The block storage of one worker's task pool.
pub(crate) struct Arena {
    blocks: [AtomicPtr<TaskDescriptor>; MAX_POOL_BLOCKS],
}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            blocks: core::array::from_fn(|_| AtomicPtr::new(core::ptr::null_mut())),
        }
    }

    /// Resolves a logical index to its descriptor, or `None` if the covering
    /// block has not been published yet. Safe to call from any thread; the
    /// acquire load pairs with the release store in
    /// [`lookup_or_grow`](Arena::lookup_or_grow).
    #[inline(always)]
    pub fn slot(&self, index: usize) -> Option<NonNull<TaskDescriptor>> {
        let block = block_of(index);
        debug_assert!(block < MAX_POOL_BLOCKS);
        let base = self.blocks[block].load(Ordering::Acquire);
        NonNull::new(base).map(|base| {
            // SAFETY: A published block covers every index in
            // `[block_first(block), block_first(block) + block_len(block))`,
            // and `block_of` proved `index` lands in that range.
            unsafe { base.add(index - block_first(block)) }
        })
    }

    /// Returns the base pointer of `block`, allocating and publishing the
    /// block if this is the first time the pool has grown this far. Owner
    /// side only.
    pub fn lookup_or_grow(
        &self,
        block: usize,
        max_blocks: usize,
    ) -> Result<NonNull<TaskDescriptor>, SpawnError> {
        if block >= max_blocks {
            return Err(SpawnError::CapacityExceeded);
        }
        // The owner is the only writer, so a relaxed load of its own store
        // is enough here.
        if let Some(base) = NonNull::new(self.blocks[block].load(Ordering::Relaxed)) {
            return Ok(base);
        }

        let len = block_len(block);
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, TaskDescriptor::new);
        let base = Box::into_raw(slots.into_boxed_slice()).cast::<TaskDescriptor>();
        tracing::debug!(block, slots = len, "grew task pool");
        self.blocks[block].store(base, Ordering::Release);
        // SAFETY: `Box::into_raw` never returns null.
        Ok(unsafe { NonNull::new_unchecked(base) })
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for (block, slot) in self.blocks.iter().enumerate() {
            let base = slot.load(Ordering::Acquire);
            if !base.is_null() {
                let slice = core::ptr::slice_from_raw_parts_mut(base, block_len(block));
                // SAFETY: Published by `lookup_or_grow` from `Box::into_raw`
                // with exactly this length, and never freed elsewhere.
                drop(unsafe { Box::from_raw(slice) });
            }
        }
    }
}

#[cfg(all(test, not(loom), not(feature = "shuttle")))]
mod tests {
    use super::*;
    use crate::util::XorShift64Star;

    #[test]
    fn index_translation_covers_every_block() {
        assert_eq!(block_of(0), 0);
        assert_eq!(block_of(255), 0);
        assert_eq!(block_of(256), 1);
        assert_eq!(block_of(767), 1);
        assert_eq!(block_of(768), 2);
        assert_eq!(block_first(0), 0);
        assert_eq!(block_first(1), 256);
        assert_eq!(block_first(2), 768);
        assert_eq!(block_len(2), 1024);
    }

    #[test]
    fn random_indices_land_inside_their_block() {
        let rng = XorShift64Star::from_seed(0x5eed);
        for _ in 0..10_000 {
            let index = rng.next_usize(block_first(MAX_POOL_BLOCKS));
            let block = block_of(index);
            let first = block_first(block);
            assert!(first <= index);
            assert!(index < first + block_len(block));
            assert!(block < MAX_POOL_BLOCKS);
        }
    }

    #[test]
    fn grown_blocks_resolve_distinct_slots() {
        let arena = Arena::new();
        assert!(arena.slot(0).is_none());

        arena.lookup_or_grow(0, 2).unwrap();
        arena.lookup_or_grow(1, 2).unwrap();
        let a = arena.slot(0).unwrap();
        let b = arena.slot(255).unwrap();
        let c = arena.slot(256).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        // Index 511 lives in block 1 as well.
        assert!(arena.slot(511).is_some());
        // Block 2 was never grown.
        assert!(arena.slot(768).is_none());
    }

    #[test]
    fn growth_respects_the_block_limit() {
        let arena = Arena::new();
        assert!(arena.lookup_or_grow(0, 1).is_ok());
        assert_eq!(
            arena.lookup_or_grow(1, 1),
            Err(SpawnError::CapacityExceeded)
        );
    }
}
