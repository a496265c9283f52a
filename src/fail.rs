//! Fatal error handling.
//!
//! The allocator has no way to roll back a half-done directory update, so a failing OS
//! service is never retried nor reported back to the caller: [`die`] is called and the
//! process ends there.

use std::{
    fmt::{self, Write},
    mem,
    process,
    sync::atomic::{AtomicPtr, Ordering},
};

use crate::kernel::{self, KernelError};

/// Function invoked with the failure when an OS service fails. It must not return.
pub type FatalHandler = fn(&KernelError) -> !;

/// The installed handler. Null stands for [`default_fatal_handler`].
static FATAL_HANDLER: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

/// Writes into a fixed stack buffer, so reporting a failure never allocates.
struct StackWriter {
    buf: [u8; 128],
    len: usize,
}

impl Write for StackWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let taken = s.len().min(room);

        self.buf[self.len..self.len + taken].copy_from_slice(&s.as_bytes()[..taken]);
        self.len += taken;

        if taken == s.len() { Ok(()) } else { Err(fmt::Error) }
    }
}

/// The default handler.
///
/// This will print the failure on stderr and abort the process.
#[cold]
fn default_fatal_handler(err: &KernelError) -> ! {
    let mut message = StackWriter {
        buf: [0; 128],
        len: 0,
    };
    let _ = writeln!(message, "osmem: {err}");

    kernel::write_stderr(&message.buf[..message.len]);

    process::abort()
}

/// Call the fatal handler.
///
/// This is used when the system refuses to move the break, map or unmap memory, and it
/// never returns.
#[cold]
pub fn die(err: KernelError) -> ! {
    log::error!("fatal OS failure: {err}");

    let handler = FATAL_HANDLER.load(Ordering::SeqCst);

    if handler.is_null() {
        default_fatal_handler(&err)
    } else {
        let handler = unsafe { mem::transmute::<*mut (), FatalHandler>(handler) };
        handler(&err)
    }
}

/// Set the fatal handler.
///
/// The handler runs in place of the default abort whenever an OS service fails.
#[inline]
pub fn set_fatal_handler(handler: FatalHandler) {
    FATAL_HANDLER.store(handler as *mut (), Ordering::SeqCst);
}
