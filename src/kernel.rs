use std::ptr::NonNull;

use crate::{
    block::{HEADER_SIZE, Header},
    error::AllocError,
    utils::{ALIGNMENT, align, padding},
};

/// This trait provides an abstraction over the low level primitive that
/// extends the heap. The allocator only needs something that behaves like
/// `sbrk(2)`: a break that moves forward and never gives memory back.
///
/// # Safety
///
/// Implementors must hand out extents that are valid for reads and writes,
/// never overlap an extent handed out before, and stay valid for as long as
/// the source is alive.
pub unsafe trait HeapSource {
    /// Moves the break forward by `increment` bytes and returns the previous
    /// break, which is the start of the new extent. `extend(0)` reports the
    /// current break. Returns `None` when the heap can't grow any more.
    unsafe fn extend(&mut self, increment: usize) -> Option<NonNull<u8>>;
}

/// The process heap, as provided by the operating system.
///
/// On unix this is the program break moved with [`libc::sbrk`]. On windows a
/// large address range is reserved up front and pages are committed as the
/// break moves forward through it.
pub struct Kernel {
    /// Start of the reserved range, null until the first extension.
    #[cfg(windows)]
    base: *mut u8,
    /// Offset of the break from `base`.
    #[cfg(windows)]
    brk: usize,
    /// Bytes from `base` already committed.
    #[cfg(windows)]
    committed: usize,
}

// The break belongs to the whole process, not to the thread that moved it.
unsafe impl Send for Kernel {}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            #[cfg(windows)]
            base: std::ptr::null_mut(),
            #[cfg(windows)]
            brk: 0,
            #[cfg(windows)]
            committed: 0,
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
mod unix {
    use super::{HeapSource, Kernel};

    use libc::{c_void, intptr_t, sbrk};

    use std::ptr::NonNull;

    unsafe impl HeapSource for Kernel {
        unsafe fn extend(&mut self, increment: usize) -> Option<NonNull<u8>> {
            // Anything bigger would be read by sbrk as a negative increment.
            if increment > isize::MAX as usize {
                return None;
            }

            unsafe {
                let addr: *mut c_void = sbrk(increment as intptr_t);

                if addr == usize::MAX as *mut c_void {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{HeapSource, Kernel};
    use crate::utils::align;

    use ::windows::Win32::System::{Memory, SystemInformation};

    /// Address space reserved for the heap. Only what the break crosses is committed.
    #[cfg(target_pointer_width = "64")]
    const RESERVE_SIZE: usize = 1 << 36;
    #[cfg(not(target_pointer_width = "64"))]
    const RESERVE_SIZE: usize = 1 << 29;

    fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }

    unsafe impl HeapSource for Kernel {
        unsafe fn extend(&mut self, increment: usize) -> Option<NonNull<u8>> {
            unsafe {
                if self.base.is_null() {
                    let base = Memory::VirtualAlloc(None, RESERVE_SIZE, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);
                    if base.is_null() {
                        return None;
                    }
                    self.base = base.cast();
                }

                let old = self.brk;
                let new = old.checked_add(increment).filter(|&new| new <= RESERVE_SIZE)?;

                if new > self.committed {
                    let target = align(new, page_size()).min(RESERVE_SIZE);
                    let addr = Memory::VirtualAlloc(
                        Some(self.base.add(self.committed) as *const c_void),
                        target - self.committed,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    );

                    if addr.is_null() {
                        return None;
                    }
                    self.committed = target;
                }

                self.brk = new;
                NonNull::new(self.base.add(old))
            }
        }
    }
}

/// Gets a fresh block of `size` payload bytes from `source`.
///
/// The break is not necessarily aligned, so we ask for the padding that
/// takes it to the next [`ALIGNMENT`] boundary on top of the block. Those
/// padding bytes are lost for good. If someone else moved the break between
/// reading it and extending it, the extent we got may start somewhere else,
/// in which case we ask for whatever is still missing.
///
/// The returned header is aligned and followed by `HEADER_SIZE + size` bytes.
pub(crate) unsafe fn grow_heap<S: HeapSource + ?Sized>(
    source: &mut S,
    size: usize,
) -> Result<NonNull<Header>, AllocError> {
    let exhausted = AllocError::exhausted(size);
    let total = size.checked_add(HEADER_SIZE).ok_or(exhausted)?;

    unsafe {
        let brk = source.extend(0).ok_or(exhausted)?;
        let pad = padding(brk.as_ptr() as usize, ALIGNMENT);
        let requested = total.checked_add(pad).ok_or(exhausted)?;

        let raw = source.extend(requested).ok_or(exhausted)?.as_ptr() as usize;
        let end = raw.checked_add(requested).ok_or(exhausted)?;
        let start = align(raw, ALIGNMENT);
        let needed = start.checked_add(total).ok_or(exhausted)?;

        if needed > end {
            let more = source.extend(needed - end).ok_or(exhausted)?;

            if more.as_ptr() as usize != end {
                return Err(exhausted);
            }
        }

        Ok(NonNull::new_unchecked(start as *mut Header))
    }
}
