//! Arena growth: the one-time preallocation and every later move of the break.

use std::ptr::NonNull;

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockRef, Status},
    config::{ALIGNMENT, INITIAL_ARENA_SIZE},
    fail,
    heap::Heap,
    kernel::Kernel,
    utils::align,
};

impl<K: Kernel> Heap<K> {
    fn current_break(&mut self) -> NonNull<u8> {
        self.kernel
            .current_break()
            .unwrap_or_else(|err| fail::die(err))
    }

    fn extend_break(&mut self, increment: usize) -> NonNull<u8> {
        self.kernel
            .extend_break(increment)
            .unwrap_or_else(|err| fail::die(err))
    }

    /// Takes `len` fresh bytes from the break. The break is first padded up to
    /// [`ALIGNMENT`], so the returned address can hold a header whatever the break was.
    fn claim(&mut self, len: usize) -> NonNull<u8> {
        let current = self.current_break().addr().get();
        let pad = align(current, ALIGNMENT) - current;

        let old = self.extend_break(pad + len);

        unsafe { old.add(pad) }
    }

    /// Reserves [`INITIAL_ARENA_SIZE`] bytes from the break no matter how small the first
    /// request is. The front of the region is handed out with exactly `footprint` bytes,
    /// the rest is left behind as a free block when it is big enough to be one.
    pub(crate) fn preallocate(&mut self, footprint: usize) -> BlockRef {
        debug_assert!(footprint <= INITIAL_ARENA_SIZE);

        let addr = self.claim(INITIAL_ARENA_SIZE);

        let block = unsafe {
            self.directory.attach(
                addr,
                INITIAL_ARENA_SIZE - BLOCK_HEADER_SIZE,
                Status::Allocated,
            )
        };
        self.directory.split(block, footprint);
        self.preallocated = true;

        log::debug!("preallocated {INITIAL_ARENA_SIZE} bytes of arena at {addr:p}");

        block
    }

    /// Grows `block`, the last block living in the arena, to a payload of `size` bytes by
    /// moving the break forward by the missing bytes only.
    ///
    /// Returns `false` without touching `block` when it does not end at the break, i.e.
    /// someone else moved the break since it was carved.
    pub(crate) fn grow_tail(&mut self, block: BlockRef, size: usize) -> bool {
        debug_assert!(size > block.size());

        if self.current_break().addr().get() != block.end() {
            log::warn!("break moved past {:p}, not growing it in place", block.payload());
            return false;
        }

        let shortfall = size - block.size();
        let old = self.extend_break(shortfall);

        if old.addr().get() != block.end() {
            // Lost a race for the break: those bytes are not ours to merge.
            log::warn!("break moved under {:p}, abandoning {shortfall} bytes", block.payload());
            return false;
        }

        block.set_size(size);

        log::debug!("grew {:p} in place to {size} bytes", block.payload());

        true
    }

    /// Appends a brand new allocated block of `size` payload bytes past the break.
    pub(crate) fn extend_arena(&mut self, size: usize) -> BlockRef {
        let addr = self.claim(BLOCK_HEADER_SIZE + size);

        log::debug!("extended arena by {} bytes at {addr:p}", BLOCK_HEADER_SIZE + size);

        unsafe { self.directory.attach(addr, size, Status::Allocated) }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        block::{BLOCK_HEADER_SIZE, Status},
        config::INITIAL_ARENA_SIZE,
        heap::Heap,
        kernel::{Kernel, ReservedBreak},
    };

    fn heap() -> Heap<ReservedBreak> {
        Heap::with_kernel(ReservedBreak::new(1 << 20).unwrap())
    }

    #[test]
    fn preallocation_reserves_initial_region() {
        let mut heap = heap();

        let block = heap.preallocate(BLOCK_HEADER_SIZE + 64);

        assert!(heap.is_preallocated());
        assert_eq!(heap.kernel().used(), INITIAL_ARENA_SIZE);
        assert_eq!(block.size(), 64);

        let rest = block.next().unwrap();
        assert!(rest.status().is_free());
        assert_eq!(rest.footprint(), INITIAL_ARENA_SIZE - BLOCK_HEADER_SIZE - 64);
        assert_eq!(rest.end(), block.start().addr().get() + INITIAL_ARENA_SIZE);
    }

    #[test]
    fn preallocation_without_room_for_remainder_keeps_everything() {
        let mut heap = heap();

        let block = heap.preallocate(INITIAL_ARENA_SIZE);

        assert_eq!(block.footprint(), INITIAL_ARENA_SIZE);
        assert!(block.next().is_none());
    }

    #[test]
    fn grow_tail_moves_break_by_shortfall() {
        let mut heap = heap();
        let block = heap.extend_arena(64);
        let before = heap.kernel().used();

        assert!(heap.grow_tail(block, 200));

        assert_eq!(block.size(), 200);
        assert_eq!(heap.kernel().used(), before + 136);
    }

    #[test]
    fn grow_tail_refuses_when_break_moved() {
        let mut heap = heap();
        let block = heap.extend_arena(64);

        // Someone else takes a bite out of the break.
        heap.kernel.extend_break(16).unwrap();

        assert!(!heap.grow_tail(block, 128));
        assert_eq!(block.size(), 64);
    }

    #[test]
    fn extend_arena_appends_contiguous_blocks() {
        let mut heap = heap();
        let first = heap.extend_arena(40);
        let second = heap.extend_arena(8);

        assert!(first.touches(second));
        assert_eq!(second.status(), Status::Allocated);
        assert_eq!(heap.directory.heap_end(), Some(second));
    }
}
