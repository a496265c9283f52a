//! OS services the allocator is built on: moving a break forward and mapping whole
//! chunks of pages.
//!
//! The allocator never talks to the operating system directly. It goes through the
//! [`Kernel`] trait, which comes in two flavours:
//!
//! - [`ProgramBreak`]: the real thing. On unix the arena grows with `sbrk` and large
//!   blocks come from `mmap`. Windows has no program break, so one is emulated on top of
//!   a big address space reservation that gets committed as it grows.
//! - [`ReservedBreak`]: a private break inside a reservation owned by the value. Every
//!   heap built on one is fully independent from the process break and from other heaps.

use std::ptr::NonNull;

use cfg_if::cfg_if;

use crate::utils::align;

/// Ways an OS service can fail. The allocator treats all of them as fatal, see
/// [`crate::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum KernelError {
    #[display("sbrk() failed: increment={increment}")]
    BreakFailed { increment: usize },
    #[display("break reservation exhausted: increment={increment}, remaining={remaining}")]
    BreakExhausted { increment: usize, remaining: usize },
    #[display("mmap() failed: len={len}")]
    MapFailed { len: usize },
    #[display("munmap() failed: addr={addr:#x}, len={len}")]
    UnmapFailed { addr: usize, len: usize },
    #[display("address space reservation failed: len={len}")]
    ReserveFailed { len: usize },
    #[display("page commit failed: addr={addr:#x}, len={len}")]
    CommitFailed { addr: usize, len: usize },
}

/// This trait provides an abstraction over the low level memory operations and
/// syscalls the allocator needs. The allocator's view of them has nothing to do with
/// the concrete APIs offered by each kernel.
///
/// # Safety
///
/// Implementors must hand out memory that is readable, writable, word aligned when the
/// break is, and not used by anything else. Bytes obtained from [`Kernel::extend_break`]
/// must directly follow the bytes of the previous extension as long as nobody else moves
/// the break, and stay valid for as long as the implementor lives. Mappings must be
/// zero-filled.
pub unsafe trait Kernel {
    /// Current end of the break region.
    fn current_break(&mut self) -> Result<NonNull<u8>, KernelError>;

    /// Moves the break forward by `increment` bytes and returns the old break, i.e. the
    /// first of the new bytes.
    fn extend_break(&mut self, increment: usize) -> Result<NonNull<u8>, KernelError>;

    /// Requests a standalone mapping of exactly `len` bytes.
    fn map(&mut self, len: usize) -> Result<NonNull<u8>, KernelError>;

    /// Returns the mapping of size `len` starting at `addr` back to the kernel.
    ///
    /// # Safety
    ///
    /// `addr` and `len` must describe exactly one mapping obtained from [`Kernel::map`],
    /// and nothing may use that memory afterwards.
    unsafe fn unmap(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), KernelError>;
}

cfg_if! {
    if #[cfg(unix)] {
        use self::unix as platform;
    } else if #[cfg(windows)] {
        use self::windows as platform;
    } else {
        compile_error!("osmem supports unix and windows targets only");
    }
}

/// Returns the virtual memory page size of the computer in bytes.
#[inline]
pub fn page_size() -> usize {
    platform::page_size()
}

fn map_pages(len: usize) -> Result<NonNull<u8>, KernelError> {
    platform::map(len).ok_or(KernelError::MapFailed { len })
}

unsafe fn unmap_pages(addr: NonNull<u8>, len: usize) -> Result<(), KernelError> {
    if unsafe { platform::unmap(addr, len) } {
        Ok(())
    } else {
        Err(KernelError::UnmapFailed {
            addr: addr.addr().get(),
            len,
        })
    }
}

/// Writes straight to the standard error stream without allocating.
pub(crate) fn write_stderr(bytes: &[u8]) {
    platform::write_stderr(bytes);
}

cfg_if! {
    if #[cfg(unix)] {
        /// The process program break, moved with `sbrk`.
        ///
        /// Nothing stops other code in the process (libc's own `malloc`, another heap)
        /// from moving the break too. The heap copes with that by only growing its last
        /// block in place when that block still ends at the break.
        #[derive(Debug, Default)]
        pub struct ProgramBreak {
            _private: (),
        }

        impl ProgramBreak {
            pub const fn new() -> Self {
                Self { _private: () }
            }
        }

        unsafe impl Kernel for ProgramBreak {
            fn current_break(&mut self) -> Result<NonNull<u8>, KernelError> {
                platform::sbrk(0).ok_or(KernelError::BreakFailed { increment: 0 })
            }

            fn extend_break(&mut self, increment: usize) -> Result<NonNull<u8>, KernelError> {
                platform::sbrk(increment).ok_or(KernelError::BreakFailed { increment })
            }

            fn map(&mut self, len: usize) -> Result<NonNull<u8>, KernelError> {
                map_pages(len)
            }

            unsafe fn unmap(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), KernelError> {
                unsafe { unmap_pages(addr, len) }
            }
        }
    } else {
        /// Emulated program break: a [`crate::config::DEFAULT_RESERVATION`] sized
        /// reservation taken on first use and committed as it grows.
        #[derive(Debug, Default)]
        pub struct ProgramBreak {
            arena: Option<ReservedBreak>,
        }

        impl ProgramBreak {
            pub const fn new() -> Self {
                Self { arena: None }
            }

            fn arena(&mut self) -> Result<&mut ReservedBreak, KernelError> {
                let arena = match self.arena.take() {
                    Some(arena) => arena,
                    None => ReservedBreak::new(crate::config::DEFAULT_RESERVATION)?,
                };

                Ok(self.arena.insert(arena))
            }
        }

        unsafe impl Kernel for ProgramBreak {
            fn current_break(&mut self) -> Result<NonNull<u8>, KernelError> {
                self.arena()?.current_break()
            }

            fn extend_break(&mut self, increment: usize) -> Result<NonNull<u8>, KernelError> {
                self.arena()?.extend_break(increment)
            }

            fn map(&mut self, len: usize) -> Result<NonNull<u8>, KernelError> {
                map_pages(len)
            }

            unsafe fn unmap(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), KernelError> {
                unsafe { unmap_pages(addr, len) }
            }
        }
    }
}

/// A break of its own: a fixed-capacity reservation whose start plays the role of the
/// initial program break.
///
/// The reservation is released when the value is dropped, so a heap built on top of it
/// must not be used past that point. Mapped blocks still come from the OS.
#[derive(Debug)]
pub struct ReservedBreak {
    base: NonNull<u8>,
    capacity: usize,
    /// Offset of the break from `base`.
    brk: usize,
    /// Bytes from `base` that are backed by readable and writable pages.
    committed: usize,
}

// The reservation is exclusively owned by the value.
unsafe impl Send for ReservedBreak {}

impl ReservedBreak {
    /// Reserves `capacity` bytes (rounded up to whole pages) of address space.
    pub fn new(capacity: usize) -> Result<Self, KernelError> {
        let capacity = align(capacity.max(1), page_size());
        let base = platform::reserve(capacity).ok_or(KernelError::ReserveFailed { len: capacity })?;

        log::debug!("reserved {capacity} bytes of break space at {base:p}");

        Ok(Self {
            base,
            capacity,
            brk: 0,
            committed: 0,
        })
    }

    /// Size of the reservation.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How far the break has moved from the start of the reservation.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    /// Start of the reservation.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }
}

unsafe impl Kernel for ReservedBreak {
    fn current_break(&mut self) -> Result<NonNull<u8>, KernelError> {
        Ok(unsafe { self.base.add(self.brk) })
    }

    fn extend_break(&mut self, increment: usize) -> Result<NonNull<u8>, KernelError> {
        let remaining = self.capacity - self.brk;

        if increment > remaining {
            return Err(KernelError::BreakExhausted {
                increment,
                remaining,
            });
        }

        let end = self.brk + increment;

        if end > self.committed {
            let target = align(end, page_size()).min(self.capacity);

            unsafe {
                let addr = self.base.add(self.committed);
                let len = target - self.committed;

                if !platform::commit(addr, len) {
                    return Err(KernelError::CommitFailed {
                        addr: addr.addr().get(),
                        len,
                    });
                }
            }

            self.committed = target;
        }

        let old = unsafe { self.base.add(self.brk) };
        self.brk = end;

        Ok(old)
    }

    fn map(&mut self, len: usize) -> Result<NonNull<u8>, KernelError> {
        map_pages(len)
    }

    unsafe fn unmap(&mut self, addr: NonNull<u8>, len: usize) -> Result<(), KernelError> {
        unsafe { unmap_pages(addr, len) }
    }
}

impl Drop for ReservedBreak {
    fn drop(&mut self) {
        unsafe { platform::release(self.base, self.capacity) };
    }
}

#[cfg(unix)]
mod unix {
    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    use libc::{off_t, size_t};

    // mmap parameters shared by mappings and reservations.
    const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
    const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    const FD: c_int = -1;
    const OFFSET: off_t = 0;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    const RESERVE_FLAGS: c_int = FLAGS | libc::MAP_NORESERVE;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const RESERVE_FLAGS: c_int = FLAGS;

    /// Moves the program break and returns the old one. `sbrk(0)` just reads it.
    pub(super) fn sbrk(increment: usize) -> Option<NonNull<u8>> {
        let increment = libc::intptr_t::try_from(increment).ok()?;

        let old = unsafe { libc::sbrk(increment) };

        if old == usize::MAX as *mut c_void {
            return None;
        }

        NonNull::new(old.cast())
    }

    fn mmap(len: usize, flags: c_int) -> Option<NonNull<u8>> {
        let addr = unsafe { libc::mmap(ptr::null_mut(), len as size_t, PROT, flags, FD, OFFSET) };

        match addr {
            libc::MAP_FAILED => None,
            addr => NonNull::new(addr.cast()),
        }
    }

    pub(super) fn map(len: usize) -> Option<NonNull<u8>> {
        mmap(len, FLAGS)
    }

    pub(super) unsafe fn unmap(addr: NonNull<u8>, len: usize) -> bool {
        unsafe { libc::munmap(addr.as_ptr().cast(), len as size_t) == 0 }
    }

    /// Reservations are mapped read/write right away, the kernel only backs the pages
    /// that get touched.
    pub(super) fn reserve(len: usize) -> Option<NonNull<u8>> {
        mmap(len, RESERVE_FLAGS)
    }

    pub(super) unsafe fn commit(_addr: NonNull<u8>, _len: usize) -> bool {
        true
    }

    pub(super) unsafe fn release(addr: NonNull<u8>, len: usize) {
        unsafe { libc::munmap(addr.as_ptr().cast(), len as size_t) };
    }

    pub(super) fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    pub(super) fn write_stderr(bytes: &[u8]) {
        unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
    }
}

#[cfg(windows)]
mod windows {
    use std::{io::Write, mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    pub(super) fn map(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;
        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        let addr = unsafe { Memory::VirtualAlloc(None, len, flags, protection) };

        NonNull::new(addr.cast())
    }

    pub(super) unsafe fn unmap(addr: NonNull<u8>, _len: usize) -> bool {
        unsafe { Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE).is_ok() }
    }

    /// Reservations only claim address space, pages are committed as the break grows.
    pub(super) fn reserve(len: usize) -> Option<NonNull<u8>> {
        let addr = unsafe {
            Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS)
        };

        NonNull::new(addr.cast())
    }

    pub(super) unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
        let committed = unsafe {
            Memory::VirtualAlloc(
                Some(addr.as_ptr().cast::<c_void>().cast_const()),
                len,
                Memory::MEM_COMMIT,
                Memory::PAGE_READWRITE,
            )
        };

        !committed.is_null()
    }

    pub(super) unsafe fn release(addr: NonNull<u8>, _len: usize) {
        let _ = unsafe { Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE) };
    }

    pub(super) fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }

    pub(super) fn write_stderr(bytes: &[u8]) {
        let _ = std::io::stderr().write_all(bytes);
    }
}
