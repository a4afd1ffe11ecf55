//! # Stack Arena
//!
//! All task stacks are carved from one statically sized arena at
//! creation time and returned to it only after reclamation confirms the
//! task is no longer the one executing. The arena hands out contiguous
//! runs of fixed-size blocks tracked by a simple occupancy map — no
//! global allocator involved.

use crate::config::{STACK_ARENA_SIZE, STACK_BLOCK_SIZE};
use crate::error::KernelError;

/// Number of allocatable blocks in the arena.
pub const ARENA_BLOCKS: usize = STACK_ARENA_SIZE / STACK_BLOCK_SIZE;

/// A contiguous run of arena blocks backing one task stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    first_block: usize,
    blocks: usize,
}

impl StackRegion {
    /// Usable size of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks * STACK_BLOCK_SIZE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }
}

/// Arena memory, aligned to 8 bytes as required by the ARM AAPCS for
/// stack pointers.
#[repr(align(8))]
struct ArenaMemory([u8; STACK_ARENA_SIZE]);

/// Block-granular stack allocator.
pub struct StackArena {
    memory: ArenaMemory,
    used: [bool; ARENA_BLOCKS],
}

impl StackArena {
    pub const fn new() -> Self {
        Self {
            memory: ArenaMemory([0u8; STACK_ARENA_SIZE]),
            used: [false; ARENA_BLOCKS],
        }
    }

    /// Allocate a region of at least `size` bytes (rounded up to whole
    /// blocks), first-fit. Fails with `OutOfMemory` when no contiguous
    /// run is available.
    pub fn alloc(&mut self, size: usize) -> Result<StackRegion, KernelError> {
        let blocks = size.max(1).div_ceil(STACK_BLOCK_SIZE);

        let mut run_start = 0;
        let mut run_len = 0;
        for (index, used) in self.used.iter().enumerate() {
            if *used {
                run_len = 0;
                run_start = index + 1;
                continue;
            }
            run_len += 1;
            if run_len == blocks {
                for slot in &mut self.used[run_start..run_start + blocks] {
                    *slot = true;
                }
                return Ok(StackRegion {
                    first_block: run_start,
                    blocks,
                });
            }
        }

        Err(KernelError::OutOfMemory)
    }

    /// Return a region's blocks to the free pool. Called exactly once
    /// per region, by the reclamation path.
    pub fn free(&mut self, region: StackRegion) {
        for slot in &mut self.used[region.first_block..region.first_block + region.blocks] {
            debug_assert!(*slot);
            *slot = false;
        }
    }

    /// Mutable view of a region's memory, used to build the initial
    /// context frame.
    pub fn region_mut(&mut self, region: StackRegion) -> &mut [u8] {
        let start = region.first_block * STACK_BLOCK_SIZE;
        &mut self.memory.0[start..start + region.len()]
    }

    /// Number of currently free blocks.
    pub fn free_blocks(&self) -> usize {
        self.used.iter().filter(|u| !**u).count()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
