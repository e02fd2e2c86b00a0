use crate::block::{ALLOCATED_TAG, FREE_TAG};

/// Tunables of an [`crate::Allocator`].
///
/// Built with `const` methods so it can be used when declaring a static
/// global allocator:
///
/// ```rust
/// use heapalloc::{Config, HeapAlloc};
///
/// static ALLOCATOR: HeapAlloc = HeapAlloc::with_config(Config::new().tag(0x5eed_cafe).trace(false));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Value stamped in the header of every allocated block.
    pub(crate) tag: usize,
    /// Whether the allocator emits [`log`] records.
    pub(crate) trace: bool,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            tag: ALLOCATED_TAG,
            trace: true,
        }
    }

    /// Sets the allocated tag. It can't be the value used to mark free blocks,
    /// otherwise a double release would go unnoticed.
    pub const fn tag(mut self, tag: usize) -> Self {
        assert!(tag != FREE_TAG, "the allocated tag must differ from the free tag");
        self.tag = tag;
        self
    }

    pub const fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
