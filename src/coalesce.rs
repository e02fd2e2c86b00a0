use crate::block::{FreeBlock, HEADER_SIZE};
use crate::freelist::FreeList;

/// Tries to merge the given `block` with the free block right before it in memory.
///
/// If there is one, `block` is absorbed: the previous block grows to cover
/// `block`'s header and payload, and `block` leaves the free list. The
/// surviving block is returned either way.
unsafe fn merge_with_prev(list: &mut FreeList, block: FreeBlock) -> FreeBlock {
    unsafe {
        let Some(prev) = list.find_prev(block) else {
            return block;
        };

        list.remove(block);
        prev.set_size(prev.size() + HEADER_SIZE + block.size());

        prev
    }
}

/// Tries to merge the given `block` with the free block right after it in memory.
unsafe fn merge_with_next(list: &mut FreeList, block: FreeBlock) -> FreeBlock {
    unsafe {
        let Some(next) = list.find_next(block) else {
            return block;
        };

        list.remove(next);
        block.set_size(block.size() + HEADER_SIZE + next.size());

        block
    }
}

/// Merges `block`, which must already be on the free list, with its free
/// neighbours in memory.
///
/// The previous neighbour goes first because it changes which header
/// represents the merged block. After this at most one header covers what
/// used to be up to three contiguous free extents.
pub(crate) unsafe fn coalesce(list: &mut FreeList, block: FreeBlock) -> FreeBlock {
    unsafe {
        let block = merge_with_prev(list, block);
        merge_with_next(list, block)
    }
}
