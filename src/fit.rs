//! Best-fit search and block splitting.

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockRef, Status},
    config::MIN_SPLIT_REMAINDER,
    directory::Directory,
};

impl Directory {
    /// Returns the free block whose footprint covers `footprint` with the least
    /// leftover, together with that leftover.
    ///
    /// The whole chain is scanned. Ties go to the first candidate in chain order, and
    /// the scan stops early on a perfect fit.
    pub fn best_fit(&self, footprint: usize) -> Option<(BlockRef, usize)> {
        let mut best: Option<(BlockRef, usize)> = None;

        for block in self.iter() {
            if !block.status().is_free() || block.footprint() < footprint {
                continue;
            }

            let leftover = block.footprint() - footprint;

            if best.is_none_or(|(_, least)| leftover < least) {
                best = Some((block, leftover));

                if leftover == 0 {
                    break;
                }
            }
        }

        best
    }

    /// Picks the best fitting free block for `footprint` and trims it down to exactly
    /// that footprint when the leftover can hold a block of its own.
    ///
    /// The status of the returned block is left to the caller.
    pub fn find_fit(&mut self, footprint: usize) -> Option<BlockRef> {
        let (block, _) = self.best_fit(footprint)?;

        self.split(block, footprint);

        Some(block)
    }

    /// Cuts `block` so that its footprint becomes `footprint` and links the leftover
    /// right after it as a new free block.
    ///
    /// Nothing happens if the leftover is smaller than [`MIN_SPLIT_REMAINDER`].
    /// Returns the new free block, if any.
    pub fn split(&mut self, block: BlockRef, footprint: usize) -> Option<BlockRef> {
        let leftover = block.footprint().checked_sub(footprint)?;

        if leftover < MIN_SPLIT_REMAINDER {
            return None;
        }

        block.set_size(footprint - BLOCK_HEADER_SIZE);

        let rest = unsafe {
            // The leftover lies inside the memory `block` used to cover.
            let addr = block.start().add(footprint);
            self.splice_after(block, addr, leftover - BLOCK_HEADER_SIZE, Status::Free)
        };

        log::debug!(
            "split {:p}: kept {} bytes, {:p} holds {} free bytes",
            block.payload(),
            block.size(),
            rest.payload(),
            rest.size()
        );

        Some(rest)
    }
}
