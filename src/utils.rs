//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

/// Every payload handed out by the allocator starts at a multiple of this value,
/// and every payload size is rounded up to a multiple of it.
pub const ALIGNMENT: usize = 16;

/// It aligns `to_be_aligned` using `aligment`.
///
/// `aligment` has to be a power of two. The caller is responsible for making
/// sure the addition does not overflow, see [`granule`] for the checked version.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Number of bytes we have to skip from `addr` to reach the next multiple of `aligment`.
pub fn padding(addr: usize, aligment: usize) -> usize {
    addr.wrapping_neg() & (aligment - 1)
}

/// Rounds a requested payload `size` up to the allocation granule ([`ALIGNMENT`]).
///
/// Returns `None` when the rounded size does not fit in a `usize`.
pub fn granule(size: usize) -> Option<usize> {
    size.checked_add(ALIGNMENT - 1).map(|size| size & !(ALIGNMENT - 1))
}
