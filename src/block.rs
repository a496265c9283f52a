use std::{mem, ptr::NonNull};

use crate::{config::ALIGNMENT, list::Node, utils::align};

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of the directory.
pub const BLOCK_HEADER_SIZE: usize = align(mem::size_of::<Node<Block>>(), ALIGNMENT);

/// Where a block currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum Status {
    /// Heap-resident and available for reuse.
    Free,
    /// Heap-resident and handed out to a caller.
    Allocated,
    /// Backed by its own OS mapping. Never split, merged or reused: it is unmapped
    /// wholesale when released.
    Mapped,
}

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// The following diagram represents this structure including the [`Node`] links
/// that wrap every block:
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |        prev         |        |
/// +---------------------+        | -> Header (BLOCK_HEADER_SIZE)
/// |        size         |        |
/// +---------------------+        |
/// |       status        |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Payload (`size` bytes, multiple of 8)
/// |                     |        |
/// +---------------------+ <------+
/// ```
pub(crate) struct Block {
    /// Payload capacity, header excluded.
    pub size: usize,
    pub status: Status,
}

/// Handle to a header that currently belongs to a [`crate::directory::Directory`].
///
/// Every `BlockRef` points at a live, initialised `Node<Block>`: handles are only
/// produced by the directory itself or recovered from a payload the directory handed
/// out. That is what makes the accessors below safe to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockRef(NonNull<Node<Block>>);

impl BlockRef {
    #[inline]
    pub(crate) fn new(node: NonNull<Node<Block>>) -> Self {
        Self(node)
    }

    /// Recovers the header that precedes `payload`.
    ///
    /// **SAFETY**: `payload` must have been returned by the heap and not released since.
    #[inline]
    pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        unsafe { Self(payload.sub(BLOCK_HEADER_SIZE).cast()) }
    }

    #[inline]
    pub(crate) fn as_node(self) -> NonNull<Node<Block>> {
        self.0
    }

    #[inline]
    pub(crate) fn size(self) -> usize {
        unsafe { self.0.as_ref().data.size }
    }

    #[inline]
    pub(crate) fn set_size(mut self, size: usize) {
        unsafe { self.0.as_mut().data.size = size }
    }

    #[inline]
    pub(crate) fn status(self) -> Status {
        unsafe { self.0.as_ref().data.status }
    }

    #[inline]
    pub(crate) fn set_status(mut self, status: Status) {
        unsafe { self.0.as_mut().data.status = status }
    }

    #[inline]
    pub(crate) fn next(self) -> Option<Self> {
        unsafe { self.0.as_ref().next.map(Self) }
    }

    #[inline]
    pub(crate) fn prev(self) -> Option<Self> {
        unsafe { self.0.as_ref().prev.map(Self) }
    }

    /// Header and payload together.
    #[inline]
    pub(crate) fn footprint(self) -> usize {
        BLOCK_HEADER_SIZE + self.size()
    }

    /// First byte of the header.
    #[inline]
    pub(crate) fn start(self) -> NonNull<u8> {
        self.0.cast()
    }

    #[inline]
    pub(crate) fn payload(self) -> NonNull<u8> {
        // The payload starts right after the header, inside the same memory chunk.
        unsafe { self.start().add(BLOCK_HEADER_SIZE) }
    }

    /// Address one past the last payload byte.
    #[inline]
    pub(crate) fn end(self) -> usize {
        self.start().addr().get() + self.footprint()
    }

    /// Whether `other` starts exactly where this block ends.
    #[inline]
    pub(crate) fn touches(self, other: Self) -> bool {
        self.end() == other.start().addr().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_word_aligned() {
        assert_eq!(BLOCK_HEADER_SIZE % ALIGNMENT, 0);
        assert!(BLOCK_HEADER_SIZE >= mem::size_of::<Node<Block>>());
    }

    #[test]
    fn payload_round_trips_to_header() {
        let mut memory = vec![0u64; 16];
        let node = memory.as_mut_ptr().cast::<Node<Block>>();

        unsafe {
            node.write(Node {
                next: None,
                prev: None,
                data: Block {
                    size: 64,
                    status: Status::Allocated,
                },
            });

            let block = BlockRef::new(NonNull::new_unchecked(node));
            let payload = block.payload();

            assert_eq!(payload.addr().get() - block.start().addr().get(), BLOCK_HEADER_SIZE);
            assert_eq!(BlockRef::from_payload(payload), block);
            assert_eq!(block.footprint(), BLOCK_HEADER_SIZE + 64);
            assert_eq!(block.end(), block.start().addr().get() + BLOCK_HEADER_SIZE + 64);
            assert!(block.status().is_allocated());
        }
    }
}
