//! Best-fit arena for variable-size allocations.

use std::ptr::NonNull;
use std::sync::Mutex;

use crate::mem::{Arena, align_up};

/// All blocks start on this boundary, which also caps the supported
/// alignment of requests.
const BLOCK_ALIGN: usize = 16;

/// A best-fit allocator with per-block headers and coalescing.
///
/// The arena is one fixed buffer carved into blocks. Allocation scans the
/// free blocks for the best (smallest sufficient) fit; a block is split only
/// when the leftover exceeds the configured *tolerance percent* of the
/// request, otherwise the whole block is handed out to limit fragmentation.
/// Freeing merges the block with free neighbors on both sides.
///
/// Requested alignments above 16 bytes are not supported and fail the
/// allocation.
pub struct VariableArena {
    buffer: Box<[u8]>,
    tolerance_percent: usize,
    blocks: Mutex<Vec<Block>>, // sorted by offset, covers the whole buffer
}

#[derive(Debug, Clone, Copy)]
struct Block {
    offset: usize,
    size: usize,
    free: bool,
}

unsafe impl Send for VariableArena {}
unsafe impl Sync for VariableArena {}

impl VariableArena {
    /// Create an arena of `capacity` bytes with the given split tolerance.
    /// A tolerance of 25 means a free block within 125% of the requested
    /// size is used whole instead of being split.
    pub fn new(capacity: usize, tolerance_percent: usize) -> Self {
        let capacity = align_up(capacity.max(BLOCK_ALIGN), BLOCK_ALIGN);
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            tolerance_percent,
            blocks: Mutex::new(vec![Block {
                offset: 0,
                size: capacity,
                free: true,
            }]),
        }
    }

    /// Return an allocation to the arena, merging with adjacent free blocks.
    /// The pointer must have come from this arena's [`Arena::alloc`].
    pub fn free(&self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let base = self.buffer.as_ptr() as usize;
        if addr < base || addr >= base + self.buffer.len() {
            log::warn!("variable arena free ignored pointer from another allocator");
            return;
        }
        let offset = addr - base;

        let mut blocks = self.blocks.lock().unwrap();
        let Ok(idx) = blocks.binary_search_by_key(&offset, |b| b.offset) else {
            log::warn!("variable arena free ignored pointer not at a block start");
            return;
        };
        blocks[idx].free = true;

        // Merge with the right neighbor first so the left merge sees the
        // combined size.
        if idx + 1 < blocks.len() && blocks[idx + 1].free {
            blocks[idx].size += blocks[idx + 1].size;
            blocks.remove(idx + 1);
        }
        if idx > 0 && blocks[idx - 1].free {
            blocks[idx - 1].size += blocks[idx].size;
            blocks.remove(idx);
        }
    }

    /// Number of free blocks currently on the list.
    pub fn free_block_count(&self) -> usize {
        self.blocks.lock().unwrap().iter().filter(|b| b.free).count()
    }

    /// Total free bytes.
    pub fn free_bytes(&self) -> usize {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.free)
            .map(|b| b.size)
            .sum()
    }
}

impl Arena for VariableArena {
    fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if size == 0 || !align.is_power_of_two() || align > BLOCK_ALIGN {
            return None;
        }
        let size = align_up(size, BLOCK_ALIGN);

        let mut blocks = self.blocks.lock().unwrap();

        // Best fit: smallest free block that satisfies the request.
        let best = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.free && b.size >= size)
            .min_by_key(|(_, b)| b.size)
            .map(|(i, _)| i)?;

        let block = blocks[best];
        let leftover = block.size - size;
        let tolerated = size * self.tolerance_percent / 100;

        if leftover > tolerated {
            // Split: the front becomes the allocation, the tail stays free.
            blocks[best] = Block {
                offset: block.offset,
                size,
                free: false,
            };
            blocks.insert(
                best + 1,
                Block {
                    offset: block.offset + size,
                    size: leftover,
                    free: true,
                },
            );
        } else {
            blocks[best].free = false;
        }

        NonNull::new(self.buffer[block.offset..].as_ptr() as *mut u8)
    }

    fn reset(&self) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks.clear();
        blocks.push(Block {
            offset: 0,
            size: self.buffer.len(),
            free: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_roundtrip() {
        let arena = VariableArena::new(1024, 0);

        let p = arena.alloc(100, 8).unwrap();
        assert!(arena.free_bytes() < 1024);

        arena.free(p);
        assert_eq!(arena.free_bytes(), 1024);
        assert_eq!(arena.free_block_count(), 1);
    }

    #[test]
    fn best_fit_prefers_smallest_block() {
        let arena = VariableArena::new(1024, 0);

        // Carve [a:128][hold][b:64][hold][rest]; the holds keep the freed
        // holes from coalescing.
        let a = arena.alloc(128, 8).unwrap();
        let _hold1 = arena.alloc(16, 8).unwrap();
        let b = arena.alloc(64, 8).unwrap();
        let _hold2 = arena.alloc(64, 8).unwrap();
        arena.free(a);
        arena.free(b);

        // A 64-byte request should land in b's hole, not a's.
        let c = arena.alloc(64, 8).unwrap();
        assert_eq!(c.as_ptr(), b.as_ptr());
    }

    #[test]
    fn adjacent_free_blocks_coalesce() {
        let arena = VariableArena::new(1024, 0);

        let a = arena.alloc(128, 8).unwrap();
        let b = arena.alloc(128, 8).unwrap();
        let _hold = arena.alloc(64, 8).unwrap();

        arena.free(a);
        arena.free(b);

        // a and b merged into one 256-byte hole.
        let merged = arena.alloc(256, 8).unwrap();
        assert_eq!(merged.as_ptr(), a.as_ptr());
    }

    #[test]
    fn tolerance_hands_out_whole_block() {
        let arena = VariableArena::new(1024, 50);

        let a = arena.alloc(128, 8).unwrap();
        let _hold = arena.alloc(64, 8).unwrap();
        arena.free(a);
        let free_before = arena.free_block_count();

        // 96 rounds to 96; leftover 32 <= 48 (50% of 96), so the whole
        // 128-byte block is used and no split block appears.
        let _b = arena.alloc(96, 8).unwrap();
        assert_eq!(arena.free_block_count(), free_before - 1);
    }

    #[test]
    fn exhaustion_returns_none() {
        let arena = VariableArena::new(128, 0);

        assert!(arena.alloc(128, 8).is_some());
        assert!(arena.alloc(16, 8).is_none());
    }

    #[test]
    fn over_aligned_request_returns_none() {
        let arena = VariableArena::new(128, 0);
        assert!(arena.alloc(16, 64).is_none());
    }

    #[test]
    fn reset_restores_single_free_block() {
        let arena = VariableArena::new(512, 0);
        let _a = arena.alloc(64, 8).unwrap();
        let _b = arena.alloc(64, 8).unwrap();

        arena.reset();

        assert_eq!(arena.free_block_count(), 1);
        assert_eq!(arena.free_bytes(), 512);
    }
}
