//! Splitting of blocks.
//!
//! A block of `size` bytes can give `wanted` bytes away and keep the rest as a
//! new free block only if the rest has room for its own header:
//!
//! ```text
//!  before:
//! +--------+---------------------------------------------------+
//! | Header |                  payload (size)                   |
//! +--------+---------------------------------------------------+
//!
//!  after:
//! +--------+------------------+--------+-----------------------+
//! | Header | payload (wanted) | Header | size - wanted - HEADER|
//! +--------+------------------+--------+-----------------------+
//!                             ^
//!                             remainder
//! ```
//!
//! Nothing is moved, we just write a header in the middle of an existing extent.

use std::ptr::NonNull;

use crate::block::{FreeBlock, HEADER_SIZE, Header, Link, UsedBlock};

/// Writes the remainder header of `header` when it has room for `wanted`
/// bytes plus another header. Shrinks `header` to `wanted` on success.
unsafe fn carve(header: NonNull<Header>, wanted: usize, next: Link) -> Option<FreeBlock> {
    unsafe {
        let size = (*header.as_ptr()).size;

        if size < wanted.checked_add(HEADER_SIZE)? {
            return None;
        }

        let at = header.cast::<u8>().add(HEADER_SIZE + wanted).cast::<Header>();
        let remainder = FreeBlock::init(at, size - wanted - HEADER_SIZE, None);

        (*at.as_ptr()).next = next;
        (*header.as_ptr()).size = wanted;

        Some(remainder)
    }
}

/// Splits a free block so that it keeps exactly `wanted` bytes.
///
/// The remainder inherits the block's `next` link, so it can take the block's
/// place in the free list (see [`crate::freelist::FreeList::replace`]).
/// Returns `None`, leaving the block untouched, if the remainder would be
/// too small to carry a header.
pub(crate) unsafe fn split_free(block: FreeBlock, wanted: usize) -> Option<FreeBlock> {
    unsafe {
        let next = block.next().map(FreeBlock::header);
        carve(block.header(), wanted, next)
    }
}

/// Shrinks an allocated block in place to `wanted` bytes.
///
/// The remainder is not linked anywhere, it is up to the caller to give it to
/// the free list.
pub(crate) unsafe fn shrink_used(block: &UsedBlock, wanted: usize) -> Option<FreeBlock> {
    unsafe { carve(block.header(), wanted, None) }
}
