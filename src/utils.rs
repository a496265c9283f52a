//! This file contains the helper functions for the allocator that don't belong
//! to any concrete component: size rounding and its overflow-aware variant.

/// It rounds `to_be_aligned` up to a multiple of `alignment`, which must be a power of two.
///
/// Payload sizes are rounded to [`crate::config::ALIGNMENT`] so that every header that
/// follows a payload in the arena lands on a word boundary.
#[inline]
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when `to_be_aligned`
/// is too close to `usize::MAX`.
#[inline]
pub const fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(alignment - 1) {
        Some(bumped) => Some(bumped & !(alignment - 1)),
        None => None,
    }
}
