//! Coalescing of neighbouring free blocks.
//!
//! Merges only ever touch the `size` of the surviving block and the chain links; the
//! memory of the absorbed header is left as it is.

use crate::{block::BlockRef, directory::Directory};

impl Directory {
    /// Tries to absorb the block that follows `block` on the chain. This can be
    /// performed if that next block is free and starts exactly where `block` ends.
    ///
    /// Chain neighbours are not always memory neighbours: a mapping or a foreign move
    /// of the program break can sit in between. Those pairs are left alone.
    pub fn merge_with_next(&mut self, block: BlockRef) -> bool {
        let Some(next) = block.next() else {
            return false;
        };

        if !next.status().is_free() || !block.touches(next) {
            return false;
        }

        block.set_size(block.size() + next.footprint());

        // The absorbed header is gone for good, the tail moves back if it was the tail.
        unsafe { self.detach(next) };

        log::debug!("merged {:p} into {:p}", next.payload(), block.payload());

        true
    }

    /// Tries to merge the free `block` into the previous one on the chain, which must be
    /// free as well. Returns whichever block now covers `block`'s memory.
    pub fn merge_with_prev(&mut self, block: BlockRef) -> BlockRef {
        match block.prev() {
            Some(prev) if prev.status().is_free() && self.merge_with_next(prev) => prev,
            _ => block,
        }
    }

    /// Merges the freshly freed `block` with both of its neighbours when possible: first
    /// the successor, then the predecessor. Returns the surviving block.
    pub fn coalesce(&mut self, block: BlockRef) -> BlockRef {
        debug_assert!(block.status().is_free());

        self.merge_with_next(block);
        self.merge_with_prev(block)
    }
}
