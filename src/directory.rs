//! The Block Directory: the ordered chain of every header the heap has ever handed
//! out, heap-resident or mapped.
//!
//! All link mutation goes through this module. The best-fit search and the coalescing
//! engine extend [`Directory`] from their own modules but only splice through
//! [`Directory::splice_after`] and [`Directory::detach`].

use std::ptr::NonNull;

use crate::{
    block::{Block, BlockRef, Status},
    list::List,
};

pub(crate) struct Directory {
    blocks: List<Block>,
}

/// Snapshot of one directory entry, as seen by callers inspecting a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address handed out to callers for this block.
    pub payload: NonNull<u8>,
    /// Payload capacity in bytes.
    pub size: usize,
    pub status: Status,
}

impl BlockInfo {
    /// Header plus payload.
    pub fn footprint(&self) -> usize {
        crate::block::BLOCK_HEADER_SIZE + self.size
    }

    pub(crate) fn of(block: BlockRef) -> Self {
        Self {
            payload: block.payload(),
            size: block.size(),
            status: block.status(),
        }
    }
}

impl Directory {
    pub const fn new() -> Self {
        Self { blocks: List::new() }
    }

    #[inline]
    pub fn heap_start(&self) -> Option<BlockRef> {
        self.blocks.first().map(BlockRef::new)
    }

    #[inline]
    pub fn heap_end(&self) -> Option<BlockRef> {
        self.blocks.last().map(BlockRef::new)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks in chain order.
    pub fn iter(&self) -> impl Iterator<Item = BlockRef> + '_ {
        self.blocks.nodes().map(BlockRef::new)
    }

    /// Writes a new header at `addr` and attaches it at the tail of the chain.
    ///
    /// **SAFETY**: `addr` must be word aligned and valid for `BLOCK_HEADER_SIZE + size` bytes
    /// that no other block covers.
    pub unsafe fn attach(&mut self, addr: NonNull<u8>, size: usize, status: Status) -> BlockRef {
        let node = unsafe { self.blocks.append(Block { size, status }, addr) };

        BlockRef::new(node)
    }

    /// Writes a new header at `addr` and links it right after `block`. The tail follows
    /// the new header if `block` was the tail.
    ///
    /// **SAFETY**: Same as [`Directory::attach`], and `block` must be in this directory.
    pub unsafe fn splice_after(
        &mut self,
        block: BlockRef,
        addr: NonNull<u8>,
        size: usize,
        status: Status,
    ) -> BlockRef {
        let node = unsafe {
            self.blocks
                .insert_after(block.as_node(), Block { size, status }, addr)
        };

        BlockRef::new(node)
    }

    /// Takes `block` out of the chain. Its memory is not touched.
    ///
    /// **SAFETY**: `block` must be in this directory, and must not be used as a
    /// directory handle afterwards.
    pub unsafe fn detach(&mut self, block: BlockRef) {
        unsafe { self.blocks.remove(block.as_node()) }
    }

    /// Last block of the chain that lives in the arena, skipping trailing mappings.
    pub fn last_resident(&self) -> Option<BlockRef> {
        let mut current = self.heap_end();

        while let Some(block) = current {
            if !block.status().is_mapped() {
                return Some(block);
            }
            current = block.prev();
        }

        None
    }
}
