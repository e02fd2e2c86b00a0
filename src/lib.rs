//! # heapalloc - a first-fit free list allocator
//!
//! This crate manages a single heap that grows through an `sbrk`-like
//! primitive and never shrinks. Memory is handed out in blocks, each one
//! preceded by a small header:
//!
//! ```text
//!   Single Allocation:
//!   +-----------------------+--------------------------------+
//!   |    Block Header       |         User Data              |
//!   |  +-----------------+  |                                |
//!   |  | size: N         |  |  +--------------------------+  |
//!   |  | next: (free)    |  |  |                          |  |
//!   |  | tag: allocated  |  |  |     N bytes usable       |  |
//!   |  +-----------------+  |  |                          |  |
//!   |    HEADER_SIZE bytes  |  +--------------------------+  |
//!   +-----------------------+--------------------------------+
//!                           ^
//!                           +-- Pointer returned to user (16-byte aligned)
//! ```
//!
//! Released blocks are linked through their headers into a free list. New
//! requests take the first free block that fits, splitting it when the rest
//! is big enough to be a block of its own, and released blocks are merged
//! with the free blocks right next to them.
//!
//! ## Crate Structure
//!
//! ```text
//!   heapalloc
//!   ├── allocator  - Allocator: allocate, zero_allocate, resize, release
//!   ├── global     - HeapAlloc, the GlobalAlloc adapter
//!   ├── kernel     - HeapSource trait, the OS heap (Kernel) and heap growth
//!   ├── region     - HeapSource over a fixed buffer
//!   ├── block      - block header and its free / allocated states (internal)
//!   ├── freelist   - intrusive free list (internal)
//!   ├── split      - block splitting (internal)
//!   ├── coalesce   - merging of neighbouring free blocks (internal)
//!   ├── config     - Config
//!   ├── error      - AllocError
//!   └── utils      - alignment helpers
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use heapalloc::{Allocator, Region};
//!
//! let mut memory = vec![0u8; 4096];
//! let mut allocator = Allocator::new(Region::new(&mut memory));
//!
//! let ptr = allocator.allocate(64).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xab, 64);
//!     allocator.release(ptr.as_ptr());
//! }
//! ```
//!
//! To replace the allocator of the whole process:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOCATOR: heapalloc::HeapAlloc = heapalloc::HeapAlloc::new();
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded core**: [`Allocator`] needs `&mut self`, [`HeapAlloc`] adds a spin lock.
//! - **No memory goes back to the OS**: the heap only grows.
//! - **Linear scans**: the free list is unordered, finding a fit or a neighbour walks it.
//! - **Alignment**: at most [`ALIGNMENT`] bytes.
//!
//! ## Safety
//!
//! Releasing a pointer twice, or one that didn't come from the allocator, is
//! caught by the header tag in most cases and aborts the process.

mod allocator;
mod block;
mod coalesce;
mod config;
mod error;
mod freelist;
mod global;
mod kernel;
mod region;
mod split;
pub mod utils;

pub use allocator::{Allocator, FreeExtent, Stats};
pub use block::HEADER_SIZE;
pub use config::Config;
pub use error::AllocError;
pub use global::HeapAlloc;
pub use kernel::{HeapSource, Kernel};
pub use region::Region;
pub use utils::ALIGNMENT;
