use thiserror::Error;

/// Errors the allocator can run into.
///
/// Only [`AllocError::ResourceExhausted`] is ever handed back to callers of the
/// mutating operations. An [`AllocError::IntegrityViolation`] found while
/// releasing or resizing stops the process, it is only returned by
/// [`crate::Allocator::usable_size`] which never touches the free list.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The heap source refused to extend the heap, or the request does not fit
    /// in the address space at all.
    #[error("heap exhausted while requesting {requested} bytes")]
    ResourceExhausted { requested: usize },

    /// The header in front of a payload does not carry the allocated tag.
    #[error("memory corruption detected at block {header:#x}")]
    IntegrityViolation { header: usize },
}

impl AllocError {
    pub(crate) fn exhausted(requested: usize) -> Self {
        Self::ResourceExhausted { requested }
    }
}
