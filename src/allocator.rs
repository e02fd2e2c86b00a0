use std::ptr::{self, NonNull};

use crate::{
    block::{FreeBlock, HEADER_SIZE, UsedBlock},
    coalesce::coalesce,
    config::Config,
    error::AllocError,
    freelist::FreeList,
    kernel::{HeapSource, grow_heap},
    split,
    utils::granule,
};

/// Counters describing the heap managed by an [`Allocator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Times the heap source was asked for more memory.
    pub grow_calls: usize,
    /// Bytes of blocks (headers included) carved from the heap source.
    pub heap_bytes: usize,
    /// Blocks currently handed out.
    pub live_blocks: usize,
    /// Nodes on the free list.
    pub free_blocks: usize,
}

/// A free block as seen from outside the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeExtent {
    /// Address of the block header.
    pub addr: usize,
    /// Payload bytes of the block.
    pub size: usize,
}

impl FreeExtent {
    /// Address right after the block.
    pub fn end(&self) -> usize {
        self.addr + HEADER_SIZE + self.size
    }
}

/// First-fit free list allocator over a [`HeapSource`].
///
/// ```text
///                               Free List
///
///           +-----------------------------------------------+
///           |                                               |
///      +----|-----------------------+                       |
///      |    |                       |                       v
/// +----|----|-+---------+-----------|-+---------+-----------------+-------+
/// | Free (b) | Used    | Free (a)    | Used    | Free (c)        | Used  | <- break
/// +----------+---------+-------------+---------+-----------------+-------+
///      ^
///     head
/// ```
///
/// Every request first walks the free list and takes the first block that is
/// big enough, splitting off whatever it doesn't need. Only when no free block
/// fits does the heap grow. Released blocks go to the head of the free list and
/// are merged with the free blocks right next to them in memory.
///
/// The allocator is single threaded: every operation needs `&mut self`. See
/// [`crate::HeapAlloc`] for a version that can be shared.
pub struct Allocator<S: HeapSource> {
    source: S,
    free_list: FreeList,
    config: Config,
    grow_calls: usize,
    heap_bytes: usize,
    live_blocks: usize,
}

// Blocks are only reachable through the allocator that owns them.
unsafe impl<S: HeapSource + Send> Send for Allocator<S> {}

impl<S: HeapSource> Allocator<S> {
    pub const fn new(source: S) -> Self {
        Self::with_config(source, Config::new())
    }

    pub const fn with_config(source: S, config: Config) -> Self {
        Self {
            source,
            free_list: FreeList::new(),
            config,
            grow_calls: 0,
            heap_bytes: 0,
            live_blocks: 0,
        }
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    pub fn stats(&self) -> Stats {
        Stats {
            grow_calls: self.grow_calls,
            heap_bytes: self.heap_bytes,
            live_blocks: self.live_blocks,
            free_blocks: self.free_list.len(),
        }
    }

    /// Iterates over the free list, head first.
    pub fn free_extents(&self) -> impl Iterator<Item = FreeExtent> + '_ {
        self.free_list.iter().map(|block| FreeExtent {
            addr: block.addr(),
            size: unsafe { block.size() },
        })
    }

    /// Returns a pointer to at least `size` bytes of uninitialized memory,
    /// aligned to [`crate::ALIGNMENT`].
    ///
    /// The first free block that fits is used, the heap only grows when none does.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let wanted = granule(size).ok_or(AllocError::exhausted(size))?;

        let block = match unsafe { self.take_free_block(wanted) } {
            Some(block) => block,
            None => self.grow(wanted)?,
        };

        self.live_blocks += 1;

        Ok(block.payload())
    }

    /// Same as [`Allocator::allocate`] for `count * size` bytes, which are all zero.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        let total = count.checked_mul(size).ok_or(AllocError::exhausted(usize::MAX))?;
        let payload = self.allocate(total)?;

        unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };

        Ok(payload)
    }

    /// Changes the size of the allocation at `ptr` to `size` bytes.
    ///
    /// - A null `ptr` is the same as [`Allocator::allocate`].
    /// - Shrinking happens in place, the bytes that are no longer needed go
    ///   back to the free list right away (if there are enough of them to
    ///   make a block).
    /// - Growing moves the content to a new block and releases the old one.
    ///   If the new block can't be allocated the old one is left as it was.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload returned by this allocator and not yet
    /// released. A pointer whose header fails verification aborts the process.
    pub unsafe fn resize(&mut self, ptr: *mut u8, size: usize) -> Result<NonNull<u8>, AllocError> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(size);
        };

        let wanted = granule(size).ok_or(AllocError::exhausted(size))?;

        unsafe {
            let block = self.verify(payload);
            let current = block.size();

            if wanted == current {
                return Ok(payload);
            }

            if wanted < current {
                if let Some(rest) = split::shrink_used(&block, wanted) {
                    self.free_list.push_front(rest);
                    let merged = coalesce(&mut self.free_list, rest);

                    if self.config.trace {
                        log::trace!(
                            "shrunk block {:#x} to {wanted} bytes, free block {:#x} now has {} bytes",
                            block.addr(),
                            merged.addr(),
                            merged.size()
                        );
                    }
                }

                return Ok(payload);
            }

            let moved = self.allocate(size)?;

            if self.config.trace {
                log::debug!(
                    "reallocating block {:#x} with size {current} to {:#x}",
                    block.addr(),
                    moved.as_ptr() as usize - HEADER_SIZE
                );
            }

            ptr::copy_nonoverlapping(payload.as_ptr(), moved.as_ptr(), current);
            self.release_block(block);

            Ok(moved)
        }
    }

    /// Gives the allocation at `ptr` back. Null pointers are ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a payload returned by this allocator. Releasing a
    /// pointer twice, or one this allocator never returned, is detected by the
    /// header tag in most cases, and aborts the process: once a foreign header
    /// is linked in the free list nothing it says can be trusted.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        unsafe {
            let block = self.verify(payload);
            self.release_block(block);
        }
    }

    /// Returns how many bytes can be used at `ptr`, which can be more than
    /// what was requested.
    ///
    /// Unlike [`Allocator::release`] a bad header is reported as an error.
    ///
    /// # Safety
    ///
    /// If `ptr` is aligned, the header-sized memory right before it must be readable.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, AllocError> {
        unsafe { UsedBlock::from_payload(ptr, self.config.tag).map(|block| block.size()) }
    }

    /// First-fit search. The block found leaves the free list, its remainder
    /// (if it can be split) takes its place.
    unsafe fn take_free_block(&mut self, wanted: usize) -> Option<UsedBlock> {
        unsafe {
            let block = self.free_list.find_first_fit(wanted)?;
            let available = block.size();

            match split::split_free(block, wanted) {
                Some(rest) => {
                    self.free_list.replace(block, rest);
                }
                None => {
                    self.free_list.remove(block);
                }
            }

            if self.config.trace {
                log::trace!(
                    "reusing free block {:#x} ({available} bytes) for {wanted} bytes",
                    block.addr()
                );
            }

            Some(block.into_used(self.config.tag))
        }
    }

    fn grow(&mut self, wanted: usize) -> Result<UsedBlock, AllocError> {
        let header = match unsafe { grow_heap(&mut self.source, wanted) } {
            Ok(header) => header,
            Err(err) => {
                if self.config.trace {
                    log::warn!("{err}");
                }
                return Err(err);
            }
        };

        self.grow_calls += 1;
        self.heap_bytes += HEADER_SIZE + wanted;

        if self.config.trace {
            log::trace!("heap grown by {} bytes at {:#x}", HEADER_SIZE + wanted, header.as_ptr() as usize);
        }

        Ok(unsafe { UsedBlock::init(header, wanted, self.config.tag) })
    }

    unsafe fn release_block(&mut self, block: UsedBlock) {
        unsafe {
            let freed: FreeBlock = block.into_free();

            self.free_list.push_front(freed);
            let merged = coalesce(&mut self.free_list, freed);
            self.live_blocks -= 1;

            if self.config.trace {
                log::trace!(
                    "released block {:#x}, free block {:#x} now has {} bytes",
                    freed.addr(),
                    merged.addr(),
                    merged.size()
                );
            }
        }
    }

    /// Header of `payload`, or the end of the process if it doesn't look like ours.
    unsafe fn verify(&self, payload: NonNull<u8>) -> UsedBlock {
        let block = unsafe { UsedBlock::from_payload(payload, self.config.tag) };
        block.unwrap_or_else(|err| integrity_failure(err, self.config.trace))
    }
}

/// Reports a corrupted header and stops the process.
#[cold]
fn integrity_failure(err: AllocError, trace: bool) -> ! {
    if trace {
        log::error!("{err}");
    }

    eprintln!("MEMORY CORRUPTION DETECTED: {err}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{region::Region, utils::ALIGNMENT};
    use test_log::test;

    #[repr(C, align(16))]
    struct Arena([u8; 8192]);

    fn allocator() -> Allocator<Region<'static>> {
        let arena = Box::leak(Box::new(Arena([0; 8192])));
        Allocator::new(Region::new(&mut arena.0))
    }

    fn fill(ptr: NonNull<u8>, len: usize, byte: u8) {
        unsafe { ptr::write_bytes(ptr.as_ptr(), byte, len) };
    }

    fn holds(ptr: NonNull<u8>, len: usize, byte: u8) -> bool {
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) }
            .iter()
            .all(|&b| b == byte)
    }

    #[test]
    fn payloads_are_aligned() {
        let mut allocator = allocator();

        for size in [0, 1, 7, 15, 16, 17, 31, 100, 255] {
            let ptr = allocator.allocate(size).unwrap();
            assert_eq!(0, ptr.as_ptr() as usize % ALIGNMENT, "size {size}");
        }
    }

    #[test]
    fn unaligned_region_still_gives_aligned_payloads() {
        let arena = Box::leak(Box::new(Arena([0; 8192])));
        let mut allocator = Allocator::new(Region::new(&mut arena.0[3..]));

        let a = allocator.allocate(10).unwrap();
        let b = allocator.allocate(33).unwrap();

        assert_eq!(0, a.as_ptr() as usize % ALIGNMENT);
        assert_eq!(0, b.as_ptr() as usize % ALIGNMENT);
    }

    #[test]
    fn zero_sized_allocations_are_distinct() {
        let mut allocator = allocator();

        let a = allocator.allocate(0).unwrap();
        let b = allocator.allocate(0).unwrap();

        assert_ne!(a, b);
        unsafe { assert_eq!(Ok(0), allocator.usable_size(a)) };
    }

    #[test]
    fn size_is_rounded_to_granule() {
        let mut allocator = allocator();

        let ptr = allocator.allocate(20).unwrap();
        unsafe { assert_eq!(Ok(32), allocator.usable_size(ptr)) };
    }

    #[test]
    fn patterns_do_not_alias() {
        let mut allocator = allocator();
        let sizes = [24, 100, 7, 64, 300];

        let ptrs: Vec<_> = sizes.iter().map(|&size| allocator.allocate(size).unwrap()).collect();

        for (i, (&ptr, &size)) in ptrs.iter().zip(&sizes).enumerate() {
            fill(ptr, size, i as u8 + 1);
        }

        for (i, (&ptr, &size)) in ptrs.iter().zip(&sizes).enumerate() {
            assert!(holds(ptr, size, i as u8 + 1));
        }
    }

    #[test]
    fn first_fit_reuses_released_block_without_growing() {
        let mut allocator = allocator();

        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(200).unwrap();
        fill(b, 200, 0xbb);

        unsafe { allocator.release(a.as_ptr()) };
        let grown = allocator.stats().grow_calls;

        let c = allocator.allocate(100).unwrap();
        fill(c, 100, 0xcc);

        assert_eq!(a, c);
        assert_eq!(grown, allocator.stats().grow_calls);
        assert!(holds(b, 200, 0xbb));
    }

    #[test]
    fn first_fit_takes_first_block_that_fits() {
        let mut allocator = allocator();

        let small = allocator.allocate(16).unwrap();
        let _guard1 = allocator.allocate(16).unwrap();
        let big = allocator.allocate(256).unwrap();
        let _guard2 = allocator.allocate(16).unwrap();

        unsafe {
            allocator.release(big.as_ptr());
            allocator.release(small.as_ptr());
        }

        // `small` is at the head of the list but too small, `big` is next.
        let ptr = allocator.allocate(64).unwrap();
        assert_eq!(big, ptr);
        assert_eq!(4, allocator.stats().grow_calls);
    }

    #[test]
    fn hit_splits_and_keeps_remainder_on_the_list() {
        let mut allocator = allocator();

        let big = allocator.allocate(512).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        unsafe { allocator.release(big.as_ptr()) };

        let small = allocator.allocate(64).unwrap();
        assert_eq!(big, small);

        let free: Vec<_> = allocator.free_extents().collect();
        assert_eq!(1, free.len());
        assert_eq!(small.as_ptr() as usize + 64, free[0].addr);
        assert_eq!(512 - 64 - HEADER_SIZE, free[0].size);
    }

    #[test]
    fn hit_without_room_to_split_hands_whole_block() {
        let mut allocator = allocator();

        let a = allocator.allocate(64).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        unsafe { allocator.release(a.as_ptr()) };

        let b = allocator.allocate(64 - HEADER_SIZE + 16).unwrap();
        assert_eq!(a, b);
        unsafe { assert_eq!(Ok(64), allocator.usable_size(b)) };
        assert_eq!(0, allocator.stats().free_blocks);
    }

    #[test]
    fn contiguous_blocks_coalesce_in_either_order() {
        for reversed in [false, true] {
            let mut allocator = allocator();

            let a = allocator.allocate(48).unwrap();
            let b = allocator.allocate(80).unwrap();
            let _guard = allocator.allocate(16).unwrap();

            unsafe {
                if reversed {
                    allocator.release(b.as_ptr());
                    allocator.release(a.as_ptr());
                } else {
                    allocator.release(a.as_ptr());
                    allocator.release(b.as_ptr());
                }
            }

            let free: Vec<_> = allocator.free_extents().collect();
            assert_eq!(1, free.len());
            assert_eq!(a.as_ptr() as usize - HEADER_SIZE, free[0].addr);
            assert_eq!(48 + HEADER_SIZE + 80, free[0].size);
        }
    }

    #[test]
    fn middle_release_merges_three_blocks() {
        let mut allocator = allocator();

        let a = allocator.allocate(32).unwrap();
        let b = allocator.allocate(32).unwrap();
        let c = allocator.allocate(32).unwrap();
        let _guard = allocator.allocate(16).unwrap();

        unsafe {
            allocator.release(a.as_ptr());
            allocator.release(c.as_ptr());
            assert_eq!(2, allocator.stats().free_blocks);

            allocator.release(b.as_ptr());
        }

        let free: Vec<_> = allocator.free_extents().collect();
        assert_eq!(1, free.len());
        assert_eq!(3 * 32 + 2 * HEADER_SIZE, free[0].size);
    }

    #[test]
    fn zero_allocate_clears_reused_memory() {
        let mut allocator = allocator();

        let dirty = allocator.allocate(128).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        fill(dirty, 128, 0xff);
        unsafe { allocator.release(dirty.as_ptr()) };

        let clean = allocator.zero_allocate(16, 8).unwrap();
        assert_eq!(dirty, clean);
        assert!(holds(clean, 128, 0));
    }

    #[test]
    fn zero_allocate_overflow_is_exhaustion() {
        let mut allocator = allocator();

        assert_eq!(
            Err(AllocError::exhausted(usize::MAX)),
            allocator.zero_allocate(usize::MAX, 2),
        );
        assert_eq!(0, allocator.stats().grow_calls);
    }

    #[test]
    fn exhaustion_leaves_allocator_usable() {
        let mut allocator = allocator();

        let big = allocator.allocate(4096).unwrap();
        assert_eq!(Err(AllocError::exhausted(8192)), allocator.allocate(8192));

        unsafe { allocator.release(big.as_ptr()) };
        assert_eq!(big, allocator.allocate(4096).unwrap());
        assert_eq!(Err(AllocError::exhausted(usize::MAX)), allocator.allocate(usize::MAX));
    }

    #[test]
    fn resize_null_allocates() {
        let mut allocator = allocator();

        let ptr = unsafe { allocator.resize(ptr::null_mut(), 40) }.unwrap();
        unsafe { assert_eq!(Ok(48), allocator.usable_size(ptr)) };
        assert_eq!(1, allocator.stats().live_blocks);
    }

    #[test]
    fn resize_same_size_is_noop() {
        let mut allocator = allocator();

        let ptr = allocator.allocate(64).unwrap();
        let before = allocator.stats();

        assert_eq!(ptr, unsafe { allocator.resize(ptr.as_ptr(), 64) }.unwrap());
        assert_eq!(ptr, unsafe { allocator.resize(ptr.as_ptr(), 60) }.unwrap());
        assert_eq!(before, allocator.stats());
    }

    #[test]
    fn resize_grow_preserves_content() {
        let mut allocator = allocator();

        let old = allocator.allocate(40).unwrap();
        for i in 0..40 {
            unsafe { old.as_ptr().add(i).write(i as u8) };
        }
        let _guard = allocator.allocate(16).unwrap();

        let new = unsafe { allocator.resize(old.as_ptr(), 400) }.unwrap();
        assert_ne!(old, new);

        for i in 0..40 {
            assert_eq!(i as u8, unsafe { new.as_ptr().add(i).read() });
        }

        // The old block went back to the free list.
        assert!(allocator.free_extents().any(|free| free.addr == old.as_ptr() as usize - HEADER_SIZE));
        assert_eq!(2, allocator.stats().live_blocks);
        unsafe { assert!(allocator.usable_size(old).is_err()) };
    }

    #[test]
    fn failed_resize_keeps_old_block() {
        let mut allocator = allocator();

        let old = allocator.allocate(64).unwrap();
        fill(old, 64, 0x5a);

        assert_eq!(Err(AllocError::exhausted(10_000)), unsafe { allocator.resize(old.as_ptr(), 10_000) });
        assert!(holds(old, 64, 0x5a));
        unsafe { assert_eq!(Ok(64), allocator.usable_size(old)) };
        assert_eq!(1, allocator.stats().live_blocks);
    }

    #[test]
    fn resize_shrink_frees_remainder_for_reuse() {
        let mut allocator = allocator();

        let ptr = allocator.allocate(256).unwrap();
        let _guard = allocator.allocate(16).unwrap();
        let grown = allocator.stats().grow_calls;

        let same = unsafe { allocator.resize(ptr.as_ptr(), 64) }.unwrap();
        assert_eq!(ptr, same);
        unsafe { assert_eq!(Ok(64), allocator.usable_size(ptr)) };

        let remainder = 256 - 64 - HEADER_SIZE;
        let reused = allocator.allocate(remainder).unwrap();

        assert_eq!(ptr.as_ptr() as usize + 64 + HEADER_SIZE, reused.as_ptr() as usize);
        assert_eq!(grown, allocator.stats().grow_calls);
    }

    #[test]
    fn resize_shrink_remainder_merges_with_free_neighbour() {
        let mut allocator = allocator();

        let a = allocator.allocate(128).unwrap();
        let b = allocator.allocate(64).unwrap();
        let _guard = allocator.allocate(16).unwrap();

        unsafe {
            allocator.release(b.as_ptr());
            allocator.resize(a.as_ptr(), 32).unwrap();
        }

        let free: Vec<_> = allocator.free_extents().collect();
        assert_eq!(1, free.len());
        assert_eq!(a.as_ptr() as usize + 32, free[0].addr);
        assert_eq!(128 - 32 - HEADER_SIZE + HEADER_SIZE + 64, free[0].size);
    }

    #[test]
    fn release_null_is_noop() {
        let mut allocator = allocator();

        unsafe { allocator.release(ptr::null_mut()) };
        assert_eq!(Stats::default(), allocator.stats());
    }

    #[test]
    fn usable_size_rejects_foreign_pointers() {
        let mut allocator = allocator();
        let ptr = allocator.allocate(64).unwrap();

        unsafe {
            let inside = NonNull::new_unchecked(ptr.as_ptr().add(32));
            assert!(matches!(
                allocator.usable_size(inside),
                Err(AllocError::IntegrityViolation { .. })
            ));

            let odd = NonNull::new_unchecked(ptr.as_ptr().add(3));
            assert_eq!(
                Err(AllocError::IntegrityViolation { header: odd.as_ptr() as usize - HEADER_SIZE }),
                allocator.usable_size(odd)
            );
        }
    }

    #[test]
    fn custom_tag_is_stamped() {
        let arena = Box::leak(Box::new(Arena([0; 8192])));
        let config = Config::new().tag(0xfeed).trace(false);
        let mut allocator = Allocator::with_config(Region::new(&mut arena.0), config);

        let ptr = allocator.allocate(32).unwrap();
        unsafe {
            assert_eq!(Ok(32), allocator.usable_size(ptr));
            assert!(UsedBlock::from_payload(ptr, crate::block::ALLOCATED_TAG).is_err());
        }
    }

    #[test]
    fn stats_track_blocks() {
        let mut allocator = allocator();

        let a = allocator.allocate(10).unwrap();
        let b = allocator.allocate(20).unwrap();
        let _guard = allocator.allocate(30).unwrap();

        assert_eq!(
            Stats {
                grow_calls: 3,
                heap_bytes: 16 + 32 + 32 + 3 * HEADER_SIZE,
                live_blocks: 3,
                free_blocks: 0,
            },
            allocator.stats()
        );

        unsafe {
            allocator.release(a.as_ptr());
            allocator.release(b.as_ptr());
        }

        let stats = allocator.stats();
        assert_eq!(1, stats.live_blocks);
        assert_eq!(1, stats.free_blocks);
    }
}
