//! A small general purpose memory allocator.
//!
//! Small requests are carved out of an arena grown with the program break, large ones
//! get a mapping of their own. Every block, wherever it lives, is preceded by a header
//! that links it into a single ordered directory:
//!
//! ```text
//! +--------------------------------+
//! | Header | Payload (8 aligned)   |
//! +--------------------------------+
//!          ^
//!          address handed out
//! ```
//!
//! [`Heap`] is the allocator itself and can be used directly, either on the process
//! break or on a private [`ReservedBreak`]. [`OsMem`] wraps one behind a lock so it can
//! be installed as the `#[global_allocator]`.

mod arena;
mod block;
mod coalesce;
pub mod config;
mod directory;
pub mod fail;
#[cfg(feature = "ffi")]
mod ffi;
mod fit;
mod global;
mod heap;
pub mod kernel;
mod list;
mod mapper;
mod utils;

pub use block::Status;
pub use directory::BlockInfo;
pub use fail::{FatalHandler, set_fatal_handler};
pub use global::OsMem;
pub use heap::Heap;
pub use kernel::{Kernel, KernelError, ProgramBreak, ReservedBreak};

#[cfg(feature = "ffi")]
pub use ffi::{os_calloc, os_free, os_malloc, os_realloc};
