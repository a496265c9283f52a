//! Large blocks living in mappings of their own.

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockRef, Status},
    fail,
    heap::Heap,
    kernel::Kernel,
};

impl<K: Kernel> Heap<K> {
    /// Maps exactly `footprint` bytes and appends them to the directory as a mapped
    /// block. The payload comes zero-filled from the OS.
    pub(crate) fn map_block(&mut self, footprint: usize) -> BlockRef {
        let addr = self
            .kernel
            .map(footprint)
            .unwrap_or_else(|err| fail::die(err));

        log::debug!("mapped {footprint} bytes at {addr:p}");

        unsafe {
            self.directory
                .attach(addr, footprint - BLOCK_HEADER_SIZE, Status::Mapped)
        }
    }

    /// Takes a mapped block out of the directory and gives its pages back.
    ///
    /// With the mapping gone its two chain neighbours become chain-adjacent, so they are
    /// merged when both are free.
    ///
    /// **SAFETY**: `block` must be a mapped block of this heap. Its memory is gone
    /// afterwards.
    pub(crate) unsafe fn unmap_block(&mut self, block: BlockRef) {
        debug_assert!(block.status().is_mapped());

        let prev = block.prev();
        let (addr, len) = (block.start(), block.footprint());

        unsafe {
            self.directory.detach(block);
            self.kernel
                .unmap(addr, len)
                .unwrap_or_else(|err| fail::die(err));
        }

        log::debug!("unmapped {len} bytes at {addr:p}");

        if let Some(prev) = prev {
            if prev.status().is_free() {
                self.directory.merge_with_next(prev);
            }
        }
    }
}
