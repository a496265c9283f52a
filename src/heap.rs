use std::{cmp, ptr::{self, NonNull}};

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockRef, Status},
    config::{ALIGNMENT, MMAP_THRESHOLD, PAGE_SIZE},
    directory::{BlockInfo, Directory},
    fail,
    kernel::{Kernel, ProgramBreak},
    utils::checked_align,
};

/// The allocator: an arena grown through a [`Kernel`] break, standalone mappings for big
/// requests, and the directory of every block handed out so far.
///
/// ```text
///  arena (break)                                                  mappings
/// +---------------------------------------------------+      +------------------+
/// | +-------+    +------+    +-------+    +---------+  |      | +--------------+ |
/// | | Alloc | -> | Free | -> | Alloc | -> |  Free   | -+----->| |    Mapped    | |
/// | +-------+    +------+    +-------+    +---------+  |      | +--------------+ |
/// +---------------------------------------------------+      +------------------+
///   heap_start                                                       heap_end
/// ```
///
/// A `Heap` is not synchronised in any way; see [`crate::OsMem`] for a locked one.
/// Dropping it unmaps the blocks that still have a mapping of their own.
pub struct Heap<K: Kernel = ProgramBreak> {
    pub(crate) kernel: K,
    pub(crate) directory: Directory,
    /// Whether the initial arena region has been taken from the break.
    pub(crate) preallocated: bool,
}

// Every block reachable from the directory is owned by the heap.
unsafe impl<K: Kernel + Send> Send for Heap<K> {}

impl Heap<ProgramBreak> {
    /// Creates a heap on top of the process program break.
    pub const fn new() -> Self {
        Self::with_kernel(ProgramBreak::new())
    }
}

impl Default for Heap<ProgramBreak> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel> Heap<K> {
    /// Creates an empty heap that will take its memory from `kernel`.
    pub const fn with_kernel(kernel: K) -> Self {
        Self {
            kernel,
            directory: Directory::new(),
            preallocated: false,
        }
    }

    #[inline]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    #[inline]
    pub fn is_preallocated(&self) -> bool {
        self.preallocated
    }

    /// Number of blocks in the directory, mapped ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.directory.heap_start().is_none()
    }

    /// Walks the directory from `heap_start` to `heap_end`.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.directory.iter().map(BlockInfo::of)
    }

    /// Allocates `size` bytes. Returns `None` for a zero size, and for sizes so close to
    /// `usize::MAX` that the block footprint cannot be computed.
    ///
    /// The payload is aligned to [`ALIGNMENT`]. Failing to get memory from the OS is
    /// fatal, see [`crate::fail`].
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        let Some((size, footprint)) = footprint_of(size) else {
            log::warn!("allocate({size}): request too large");
            return None;
        };

        let block = self.allocate_block(size, footprint);

        if !block.status().is_mapped() {
            block.set_status(Status::Allocated);
        }

        log::trace!("allocate({size}) -> {:p} ({:?})", block.payload(), block.status());

        Some(block.payload())
    }

    /// Finds or makes a block of at least `size` payload bytes.
    fn allocate_block(&mut self, size: usize, footprint: usize) -> BlockRef {
        if !self.preallocated {
            if footprint > MMAP_THRESHOLD {
                return self.map_block(footprint);
            }

            return self.preallocate(footprint);
        }

        if let Some(block) = self.directory.find_fit(footprint) {
            return block;
        }

        if footprint > MMAP_THRESHOLD {
            return self.map_block(footprint);
        }

        if let Some(tail) = self.directory.last_resident() {
            if tail.status().is_free() && self.grow_tail(tail, size) {
                return tail;
            }
        }

        self.extend_arena(size)
    }

    /// Allocates room for `count` elements of `size` bytes each, all set to zero.
    ///
    /// Requests whose footprint reaches [`PAGE_SIZE`] get a mapping of their own, which
    /// the OS already hands out zeroed. Anything smaller goes through
    /// [`Heap::allocate`] and is cleared by hand.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        if count == 0 || size == 0 {
            return None;
        }

        let Some((total, footprint)) = count.checked_mul(size).and_then(footprint_of) else {
            log::warn!("zero_allocate({count}, {size}): request too large");
            return None;
        };

        if footprint >= PAGE_SIZE {
            let block = self.map_block(footprint);

            log::trace!("zero_allocate({count}, {size}) -> {:p} (mapped)", block.payload());

            return Some(block.payload());
        }

        let payload = self.allocate(total)?;

        unsafe { payload.write_bytes(0, total) };

        log::trace!("zero_allocate({count}, {size}) -> {payload:p}");

        Some(payload)
    }

    /// Releases the block behind `ptr`. `None` is a no-op.
    ///
    /// Mapped blocks are unmapped on the spot; arena blocks become free and are merged
    /// with free neighbours. Releasing a block that is already free is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this heap and must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };

        log::trace!("free({ptr:p})");

        unsafe { self.release(BlockRef::from_payload(ptr)) };
    }

    unsafe fn release(&mut self, block: BlockRef) {
        match block.status() {
            Status::Mapped => unsafe { self.unmap_block(block) },
            Status::Allocated => {
                block.set_status(Status::Free);
                self.directory.coalesce(block);
            }
            Status::Free => {
                log::warn!("free({:p}): block is already free", block.payload());
            }
        }
    }

    /// Changes the size of the block behind `ptr` to `size` bytes, keeping its contents up
    /// to the smaller of both sizes.
    ///
    /// - `None` behaves as [`Heap::allocate`].
    /// - A zero `size` behaves as [`Heap::free`] and returns `None`.
    /// - A block that is already free is left untouched and `None` is returned.
    /// - Mapped blocks are never resized in place: unless the aligned size stays the same
    ///   they move to a new block.
    /// - Arena blocks shrink in place, and grow in place when they sit at the end of the
    ///   arena or are followed by enough free memory. Otherwise they move.
    ///
    /// When `None` is returned for a live block (the new size cannot be represented),
    /// the block stays valid and unchanged.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this heap. If the returned address differs from `ptr`, `ptr`
    /// must not be used anymore.
    pub unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            unsafe { self.free(Some(ptr)) };
            return None;
        }

        let Some(requested) = checked_align(size, ALIGNMENT) else {
            log::warn!("resize({ptr:p}, {size}): request too large");
            return None;
        };

        let block = unsafe { BlockRef::from_payload(ptr) };
        let old_size = block.size();

        match block.status() {
            Status::Free => {
                log::warn!("resize({ptr:p}, {size}): block is free");
                return None;
            }
            Status::Mapped if old_size != requested => {
                return unsafe { self.relocate(block, old_size, size) };
            }
            _ => {}
        }

        if requested == old_size {
            return Some(ptr);
        }

        if requested < old_size {
            self.shrink(block, requested);

            log::trace!("resize({ptr:p}, {size}) -> shrunk in place");

            return Some(ptr);
        }

        if requested - old_size <= MMAP_THRESHOLD
            && self.directory.last_resident() == Some(block)
            && self.grow_tail(block, requested)
        {
            log::trace!("resize({ptr:p}, {size}) -> grew at the end of the arena");

            return Some(ptr);
        }

        if self.directory.merge_with_next(block) && block.size() >= requested {
            self.shrink(block, requested);

            log::trace!("resize({ptr:p}, {size}) -> grew into the next block");

            return Some(ptr);
        }

        unsafe { self.relocate(block, old_size, size) }
    }

    /// Cuts `block` down to `size` payload bytes. The cut-off part becomes a free block,
    /// merged with the next one if that is free too.
    fn shrink(&mut self, block: BlockRef, size: usize) {
        if let Some(rest) = self.directory.split(block, BLOCK_HEADER_SIZE + size) {
            self.directory.merge_with_next(rest);
        }
    }

    /// Moves the contents of `block` to a new block of `size` bytes and releases it.
    unsafe fn relocate(&mut self, block: BlockRef, old_size: usize, size: usize) -> Option<NonNull<u8>> {
        let payload = self.allocate(size)?;
        let old = block.payload();

        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), payload.as_ptr(), cmp::min(old_size, size));

            self.release(block);
        }

        log::trace!("moved {old:p} to {payload:p}");

        Some(payload)
    }
}

/// Gives every outstanding mapping back to the kernel. Arena blocks live inside the
/// break and go away with the kernel itself.
impl<K: Kernel> Drop for Heap<K> {
    fn drop(&mut self) {
        let mut current = self.directory.heap_start();

        while let Some(block) = current {
            current = block.next();

            if block.status().is_mapped() {
                let (addr, len) = (block.start(), block.footprint());

                unsafe {
                    self.kernel
                        .unmap(addr, len)
                        .unwrap_or_else(|err| fail::die(err));
                }

                log::debug!("unmapped {len} bytes at {addr:p} on drop");
            }
        }
    }
}

/// Aligned payload size and footprint for a request of `size` bytes.
fn footprint_of(size: usize) -> Option<(usize, usize)> {
    let size = checked_align(size, ALIGNMENT)?;
    let footprint = size.checked_add(BLOCK_HEADER_SIZE)?;

    Some((size, footprint))
}
