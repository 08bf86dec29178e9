//! Block-sized scratch buffers for direct I/O.
//!
//! `O_DIRECT` transfers need memory aligned to the device's logical sector
//! size. A `Vec<u8>` only guarantees byte alignment, so the block is
//! allocated with an explicit `Layout`.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;

/// Memory alignment used for every direct transfer.
pub const DIRECT_IO_ALIGNMENT: usize = 4096;

/// Logical sector size block sizes must be a multiple of under direct I/O.
pub const SECTOR_SIZE: usize = 512;

/// Zeroed scratch buffer of exactly one block.
pub struct AlignedBlock {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl AlignedBlock {
    /// Allocate a zeroed block whose first byte is aligned to `align`.
    ///
    /// `align` is rounded up to a power of two; 0 or 1 means byte alignment.
    pub fn new(len: usize, align: usize) -> Self {
        let align = align.max(1).next_power_of_two();
        // Zero-sized layouts cannot be allocated
        let size = len.max(1);
        let layout = Layout::from_size_align(size, align)
            .unwrap_or_else(|_| panic!("block of {} bytes exceeds the address space", len));
        // SAFETY: `layout` has a non-zero size and a power-of-two alignment.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self { ptr, len, layout }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment the block was allocated with
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` points to at least `len` initialized bytes owned by
        // `self`; the slice borrows `self`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_slice`, and `&mut self` makes the access unique.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        // SAFETY: `ptr` was allocated in `new` with exactly `layout`.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_block_alignment() {
        let mut block = AlignedBlock::new(8192, DIRECT_IO_ALIGNMENT);
        assert_eq!(block.len(), 8192);
        assert_eq!(block.as_slice().as_ptr() as usize % DIRECT_IO_ALIGNMENT, 0);
        assert!(block.as_slice().iter().all(|&b| b == 0));

        block.as_mut_slice()[8191] = 0xFF;
        assert_eq!(block.as_slice()[8191], 0xFF);
    }

    #[test]
    fn test_every_allocation_is_aligned() {
        // Interleave sizes so the allocator hands out varied addresses
        let blocks: Vec<_> = (1..=32)
            .map(|i| AlignedBlock::new(i * SECTOR_SIZE + i, DIRECT_IO_ALIGNMENT))
            .collect();
        for block in &blocks {
            assert_eq!(block.as_slice().as_ptr() as usize % DIRECT_IO_ALIGNMENT, 0);
            assert_eq!(block.align(), DIRECT_IO_ALIGNMENT);
        }
    }

    #[test]
    fn test_aligned_block_odd_alignment_rounds_up() {
        let block = AlignedBlock::new(100, 3000);
        assert_eq!(block.align(), 4096);
        assert_eq!(block.as_slice().as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn test_aligned_block_unaligned_request() {
        let block = AlignedBlock::new(100, 0);
        assert_eq!(block.len(), 100);
        assert_eq!(block.align(), 1);
        assert!(!block.is_empty());

        let empty = AlignedBlock::new(0, DIRECT_IO_ALIGNMENT);
        assert!(empty.is_empty());
        assert!(empty.as_slice().is_empty());
    }
}
