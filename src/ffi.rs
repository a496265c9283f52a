//! C entry points, for linking the allocator into non-Rust code.
//!
//! All four share one [`OsMem`], so they are safe to call from several threads.

use std::{ffi::c_void, ptr::{self, NonNull}};

use crate::global::OsMem;

static HEAP: OsMem = OsMem::new();

/// Allocates `size` bytes. Returns null for a zero size.
#[unsafe(no_mangle)]
pub extern "C" fn os_malloc(size: usize) -> *mut c_void {
    HEAP.lock()
        .allocate(size)
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr().cast())
}

/// Allocates `nmemb` zeroed elements of `size` bytes each.
#[unsafe(no_mangle)]
pub extern "C" fn os_calloc(nmemb: usize, size: usize) -> *mut c_void {
    HEAP.lock()
        .zero_allocate(nmemb, size)
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr().cast())
}

/// # Safety
///
/// `ptr` must be null or come from one of these functions and not be freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    unsafe { HEAP.lock().resize(NonNull::new(ptr.cast()), size) }
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr().cast())
}

/// # Safety
///
/// `ptr` must be null or come from one of these functions and not be freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn os_free(ptr: *mut c_void) {
    unsafe { HEAP.lock().free(NonNull::new(ptr.cast())) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_entry_points_round_trip() {
        unsafe {
            let p = os_malloc(24).cast::<u8>();
            assert!(!p.is_null());
            p.write_bytes(0xab, 24);

            let q = os_realloc(p.cast(), 4096).cast::<u8>();
            assert!(!q.is_null());
            assert_eq!(*q.add(23), 0xab);

            let z = os_calloc(16, 16).cast::<u8>();
            assert!((0..256).all(|i| *z.add(i) == 0));

            os_free(q.cast());
            os_free(z.cast());
            os_free(ptr::null_mut());
        }

        assert!(os_malloc(0).is_null());
    }
}
