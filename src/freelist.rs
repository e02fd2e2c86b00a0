use std::marker::PhantomData;

use crate::block::FreeBlock;

/// Linked list to keep track of free blocks.
///
/// The list is intrusive: the link to the next free block lives inside the
/// header of the free block itself, so keeping track of free memory costs
/// nothing on top of the headers we already have.
///
/// ```text
///
///    Head                 Free Block                   Free Block
///
///     |            +-----------------------+      +-----------------------+
///     +----------> | size | next | tag     | ---> | size | next | tag     | ---> None
///                  +-----------------------+      +-----------------------+
///                  |     Free Payload      |      |     Free Payload      |
///                  |       (unused)        |      |       (unused)        |
///                  +-----------------------+      +-----------------------+
///
/// ```
///
/// Nodes are always inserted at the head, so the list is ordered neither by
/// address nor by size. Finding neighbours of a block therefore has to scan the
/// whole list and compare addresses, see [`FreeList::find_prev`] and
/// [`FreeList::find_next`].
pub(crate) struct FreeList {
    head: Option<FreeBlock>,
    len: usize,
}

pub(crate) struct Iter<'a> {
    current: Option<FreeBlock>,
    marker: PhantomData<&'a FreeList>,
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }

    /// Links `block` in front of every other node.
    ///
    /// **SAFETY**: `block` must be a free block which is not already on the list.
    pub unsafe fn push_front(&mut self, block: FreeBlock) {
        unsafe { block.set_next(self.head) };
        self.head = Some(block);
        self.len += 1;
    }

    /// Unlinks `block` from wherever it is on the list. Returns whether it was found.
    pub unsafe fn remove(&mut self, block: FreeBlock) -> bool {
        unsafe { self.relink(block, block.next()) }
    }

    /// Puts `new` in the position `old` occupies. `new` takes over `old`'s successor.
    ///
    /// This is how the remainder of a split takes the place of the block
    /// being handed out, without walking the list twice.
    pub unsafe fn replace(&mut self, old: FreeBlock, new: FreeBlock) -> bool {
        unsafe {
            new.set_next(old.next());

            if self.relink(old, Some(new)) {
                self.len += 1;
                true
            } else {
                false
            }
        }
    }

    /// Makes whatever pointed to `block` point to `to` instead.
    unsafe fn relink(&mut self, block: FreeBlock, to: Option<FreeBlock>) -> bool {
        if self.head == Some(block) {
            self.head = to;
            self.len -= 1;
            return true;
        }

        let mut current = self.head;

        while let Some(node) = current {
            unsafe {
                let next = node.next();

                if next == Some(block) {
                    node.set_next(to);
                    self.len -= 1;
                    return true;
                }

                current = next;
            }
        }

        false
    }

    /// Returns the first block on the list with at least `size` bytes of payload.
    ///
    /// This is the first-fit algorithm: the search stops at the first
    /// block that is large enough, it is not necessarily the best fit.
    pub unsafe fn find_first_fit(&self, size: usize) -> Option<FreeBlock> {
        unsafe { self.iter().find(|block| block.size() >= size) }
    }

    /// Finds the free block whose extent ends exactly where `block` starts.
    pub unsafe fn find_prev(&self, block: FreeBlock) -> Option<FreeBlock> {
        unsafe { self.iter().find(|node| node.end() == block.addr()) }
    }

    /// Finds the free block that starts exactly where `block`'s extent ends.
    pub unsafe fn find_next(&self, block: FreeBlock) -> Option<FreeBlock> {
        let end = unsafe { block.end() };
        self.iter().find(|node| node.addr() == end)
    }
}

impl Iterator for Iter<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = unsafe { node.next() };

        Some(node)
    }
}

impl<'a> IntoIterator for &'a FreeList {
    type Item = FreeBlock;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
