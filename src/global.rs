//! [`GlobalAlloc`] adapter.

use std::{
    alloc::{GlobalAlloc, Layout},
    cmp, mem,
    ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{config::ALIGNMENT, heap::Heap, kernel::ProgramBreak};

/// A [`Heap`] on the process break behind a spin lock, usable as the global allocator.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOCATOR: osmem::OsMem = osmem::OsMem::new();
/// ```
///
/// The lock only serialises callers; the heap itself is the same single-threaded engine.
/// Layouts aligned to more than [`ALIGNMENT`] bytes are served from a bigger block, with
/// the block's own address stored in the word right before the aligned pointer.
pub struct OsMem {
    heap: Mutex<Heap<ProgramBreak>>,
}

impl OsMem {
    pub const fn new() -> Self {
        Self {
            heap: Mutex::new(Heap::new()),
        }
    }

    /// Locks the underlying heap.
    pub fn lock(&self) -> MutexGuard<'_, Heap<ProgramBreak>> {
        self.heap.lock()
    }
}

impl Default for OsMem {
    fn default() -> Self {
        Self::new()
    }
}

/// Pointer returned for `layout` when it is carved out of the block at `payload`.
///
/// The block is `layout.size() + layout.align()` bytes long: the aligned pointer lands at
/// most `align` bytes past `payload` and at least one word past it.
unsafe fn over_aligned(payload: NonNull<u8>, layout: Layout) -> *mut u8 {
    let word = mem::size_of::<usize>();
    let start = payload.addr().get() + word;
    let offset = start.next_multiple_of(layout.align()) - payload.addr().get();

    unsafe {
        let aligned = payload.as_ptr().add(offset);
        aligned.sub(word).cast::<*mut u8>().write_unaligned(payload.as_ptr());
        aligned
    }
}

/// Recovers the block payload stored in front of an over-aligned pointer.
unsafe fn block_of(ptr: *mut u8) -> NonNull<u8> {
    unsafe {
        let payload = ptr
            .sub(mem::size_of::<usize>())
            .cast::<*mut u8>()
            .read_unaligned();
        NonNull::new_unchecked(payload)
    }
}

unsafe impl GlobalAlloc for OsMem {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();

        if layout.align() <= ALIGNMENT {
            return heap.allocate(layout.size()).map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        match layout.size().checked_add(layout.align()) {
            Some(size) => match heap.allocate(size) {
                Some(payload) => unsafe { over_aligned(payload, layout) },
                None => ptr::null_mut(),
            },
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let payload = if layout.align() <= ALIGNMENT {
            NonNull::new(ptr)
        } else {
            Some(unsafe { block_of(ptr) })
        };

        unsafe { self.lock().free(payload) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= ALIGNMENT {
            return self
                .lock()
                .zero_allocate(1, layout.size())
                .map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        let ptr = unsafe { self.alloc(layout) };

        if !ptr.is_null() {
            unsafe { ptr.write_bytes(0, layout.size()) };
        }

        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= ALIGNMENT {
            return unsafe { self.lock().resize(NonNull::new(ptr), new_size) }
                .map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { self.alloc(new_layout) };

        if !new_ptr.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, cmp::min(layout.size(), new_size));
                self.dealloc(ptr, layout);
            }
        }

        new_ptr
    }
}
