//! Allocator constants.
//!
//! All of these are fixed by the allocator's contract with its callers, except for
//! [`DEFAULT_RESERVATION`] which only matters on platforms without a program break.

pub use crate::block::BLOCK_HEADER_SIZE;

/// Every payload size is rounded up to a multiple of this many bytes.
pub const ALIGNMENT: usize = 8;

/// Page size used by the zero-allocation threshold. Zero-allocations whose footprint
/// reaches this size are served by a fresh mapping, which the OS hands out zeroed.
pub const PAGE_SIZE: usize = 4 * 1024;

/// Requests whose footprint is strictly bigger than this are mapped on their own
/// instead of being carved from the arena.
pub const MMAP_THRESHOLD: usize = 128 * 1024;

/// Bytes reserved from the program break on the first arena allocation.
pub const INITIAL_ARENA_SIZE: usize = 128 * 1024;

/// Smallest leftover worth splitting off as a separate free block: a header plus at
/// least one byte of payload.
pub const MIN_SPLIT_REMAINDER: usize = BLOCK_HEADER_SIZE + 1;

/// Address space reserved up front by the emulated program break on Windows.
pub const DEFAULT_RESERVATION: usize = 1 << 30;
