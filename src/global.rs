use std::{
    alloc::{GlobalAlloc, Layout},
    ptr,
};

use spin::Mutex;

use crate::{allocator::Allocator, config::Config, kernel::Kernel, utils::ALIGNMENT};

/// [`Allocator`] over the process heap, usable as the global allocator.
///
/// ```rust,ignore
/// use heapalloc::HeapAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: HeapAlloc = HeapAlloc::new();
/// ```
///
/// Every call takes a spin lock around the allocator. Layouts that need
/// more than [`ALIGNMENT`] are refused with a null pointer.
///
/// Tracing is off by default here: a logger that allocates while the lock
/// is held would come back to this allocator and spin forever.
pub struct HeapAlloc {
    inner: Mutex<Allocator<Kernel>>,
}

impl HeapAlloc {
    pub const fn new() -> Self {
        Self::with_config(Config::new().trace(false))
    }

    pub const fn with_config(config: Config) -> Self {
        Self {
            inner: Mutex::new(Allocator::with_config(Kernel::new(), config)),
        }
    }

    /// Runs `f` with exclusive access to the underlying allocator.
    pub fn with<R>(&self, f: impl FnOnce(&mut Allocator<Kernel>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl Default for HeapAlloc {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for HeapAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        match self.inner.lock().allocate(layout.size()) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        match self.inner.lock().zero_allocate(1, layout.size()) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.inner.lock().release(ptr) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        match unsafe { self.inner.lock().resize(ptr, new_size) } {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }
}
