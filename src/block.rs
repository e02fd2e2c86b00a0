use std::{mem, ptr::NonNull};

use crate::error::AllocError;
use crate::utils::ALIGNMENT;

/// Tag stamped on the header of every allocated block unless the
/// [`crate::Config`] says otherwise.
pub(crate) const ALLOCATED_TAG: usize = 0x0123_4567;

/// Tag of a block that sits on the free list (or was absorbed by a neighbour).
pub(crate) const FREE_TAG: usize = 0;

/// Header size of a block. The header is aligned to [`ALIGNMENT`] so this is
/// always a multiple of it, which keeps payloads aligned as long as headers are.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Non-null pointer to the next free header.
pub(crate) type Link = Option<NonNull<Header>>;

/// This is the structure of a block header. Content is placed right after it.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |        next         |        | -> Header (HEADER_SIZE bytes)
/// +---------------------+        |
/// |        tag          |        |
/// +---------------------+ <------+ <- payload pointer given to the user
/// |       Content       |        |
/// |         ...         |        | -> `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+ <- next header (if any)
/// ```
///
/// The three fields never overlap. `next` only means something while the block
/// is free, `tag` tells both states apart. The header is never accessed through
/// a plain reference to `Header`: we go through [`FreeBlock`] and [`UsedBlock`]
/// so that the state of the block is known by the type we hold.
#[repr(C, align(16))]
pub(crate) struct Header {
    /// Size of the payload, header excluded.
    pub size: usize,
    /// Next free block. Garbage while allocated.
    pub next: Link,
    /// [`ALLOCATED_TAG`] (or the configured one) while allocated, [`FREE_TAG`] while free.
    pub tag: usize,
}

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

/// A block that is (or is about to be) linked in the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeBlock(NonNull<Header>);

impl FreeBlock {
    /// Writes a free header at `at`.
    ///
    /// **SAFETY**: `at` must be aligned and followed by `HEADER_SIZE + size` bytes we own.
    pub unsafe fn init(at: NonNull<Header>, size: usize, next: Option<FreeBlock>) -> Self {
        unsafe {
            at.as_ptr().write(Header {
                size,
                next: next.map(FreeBlock::header),
                tag: FREE_TAG,
            });
        }

        Self(at)
    }

    #[inline]
    pub fn header(self) -> NonNull<Header> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        unsafe { (*self.0.as_ptr()).size }
    }

    #[inline]
    pub unsafe fn set_size(self, size: usize) {
        unsafe { (*self.0.as_ptr()).size = size }
    }

    /// Address right after this block's payload.
    #[inline]
    pub unsafe fn end(self) -> usize {
        unsafe { self.addr() + HEADER_SIZE + self.size() }
    }

    #[inline]
    pub unsafe fn next(self) -> Option<FreeBlock> {
        unsafe { (*self.0.as_ptr()).next.map(FreeBlock) }
    }

    #[inline]
    pub unsafe fn set_next(self, next: Option<FreeBlock>) {
        unsafe { (*self.0.as_ptr()).next = next.map(FreeBlock::header) }
    }

    /// Marks the block as allocated. The caller must have taken it out of the free list.
    pub unsafe fn into_used(self, tag: usize) -> UsedBlock {
        unsafe { (*self.0.as_ptr()).tag = tag }
        UsedBlock(self.0)
    }
}

/// A block owned by the user of the allocator.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct UsedBlock(NonNull<Header>);

impl UsedBlock {
    /// Writes an allocated header at `at`, used for memory fresh from the heap source.
    ///
    /// **SAFETY**: `at` must be aligned and followed by `HEADER_SIZE + size` bytes we own.
    pub unsafe fn init(at: NonNull<Header>, size: usize, tag: usize) -> Self {
        unsafe {
            at.as_ptr().write(Header { size, next: None, tag });
        }

        Self(at)
    }

    /// Finds the header in front of `payload` and checks that it carries `tag`.
    ///
    /// Addresses that can't possibly be one of our payloads (misaligned, or too
    /// close to zero to have a header in front) are rejected without being read.
    ///
    /// **SAFETY**: if `payload` is aligned, the `HEADER_SIZE` bytes before it must be readable.
    pub unsafe fn from_payload(payload: NonNull<u8>, tag: usize) -> Result<Self, AllocError> {
        let addr = payload.as_ptr() as usize;
        let header = addr.wrapping_sub(HEADER_SIZE);

        if addr % ALIGNMENT != 0 || addr < HEADER_SIZE {
            return Err(AllocError::IntegrityViolation { header });
        }

        unsafe {
            let block = payload.as_ptr().sub(HEADER_SIZE).cast::<Header>();

            if (*block).tag != tag {
                return Err(AllocError::IntegrityViolation { header });
            }

            Ok(Self(NonNull::new_unchecked(block)))
        }
    }

    #[inline]
    pub fn header(&self) -> NonNull<Header> {
        self.0
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    pub fn payload(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.0.as_ptr().cast::<u8>().add(HEADER_SIZE)) }
    }

    #[inline]
    pub unsafe fn size(&self) -> usize {
        unsafe { (*self.0.as_ptr()).size }
    }

    /// Gives the block back. The tag is cleared so that releasing the same
    /// payload again is detected.
    pub unsafe fn into_free(self) -> FreeBlock {
        unsafe {
            let header = self.0.as_ptr();
            (*header).tag = FREE_TAG;
            (*header).next = None;
        }

        FreeBlock(self.0)
    }
}
