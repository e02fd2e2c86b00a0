use std::{marker::PhantomData, ptr::NonNull};

use crate::kernel::HeapSource;

/// A [`HeapSource`] over a fixed piece of memory.
///
/// The break starts at the beginning of the region and moves towards its end.
/// Once it gets there every extension fails, which is how the allocator sees
/// an exhausted heap. Useful where there is no `sbrk` to call, and to get a
/// heap with a known size and location.
///
/// ```text
///  start                    break                         end
///    |                        |                            |
///    v                        v                            v
///    +------------------------+----------------------------+
///    |   handed out extents   |      not yet handed out    |
///    +------------------------+----------------------------+
/// ```
pub struct Region<'a> {
    start: NonNull<u8>,
    len: usize,
    brk: usize,
    marker: PhantomData<&'a mut [u8]>,
}

// A region is just exclusive access to some bytes.
unsafe impl Send for Region<'_> {}

impl<'a> Region<'a> {
    /// Creates a region over `memory`.
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self {
            len: memory.len(),
            start: NonNull::from(memory).cast(),
            brk: 0,
            marker: PhantomData,
        }
    }

    /// Creates a region over `len` bytes starting at `start`.
    ///
    /// **SAFETY**: the memory must be valid for reads and writes, and not used
    /// by anything else, for `'a`.
    pub const unsafe fn from_raw_parts(start: NonNull<u8>, len: usize) -> Self {
        Self {
            start,
            len,
            brk: 0,
            marker: PhantomData,
        }
    }

    /// Total size of the region.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Bytes already handed out, padding included.
    #[inline]
    pub fn used(&self) -> usize {
        self.brk
    }

    /// Bytes the break can still move.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len - self.brk
    }

    /// Whether `addr` lies inside the region.
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.start.as_ptr() as usize;
        (start..start + self.len).contains(&addr)
    }
}

unsafe impl HeapSource for Region<'_> {
    unsafe fn extend(&mut self, increment: usize) -> Option<NonNull<u8>> {
        if increment > self.remaining() {
            return None;
        }

        let old = self.brk;
        self.brk += increment;

        unsafe { Some(self.start.add(old)) }
    }
}
