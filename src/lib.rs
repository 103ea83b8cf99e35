#![cfg_attr(not(test), no_std)]

//! A heap allocator over raw virtual memory.
//!
//! Memory is obtained from the OS in page-granular chunks and divided into
//! blocks, each a [`Block`] header followed by its payload. Every block ever
//! created sits in one singly linked chain; freeing a block only marks it
//! free, and later requests are served from free blocks chosen by a
//! [`SearchMode`]:
//!
//! - **first-fit**: the first free block that is large enough,
//! - **next-fit**: as first-fit, resuming where the last search succeeded,
//! - **best-fit**: the smallest free block that is large enough.
//!
//! A free block larger than needed is split: the request is carved from its
//! tail and the rest stays free. When nothing fits, a new chunk is mapped.
//!
//! ```text
//!   chunk 1                                  chunk 2
//!   +--------+------------+--------+-----+   +--------+--------------+
//!   | header | free ...   | header | ... |   | header | used ...     |
//!   +--------+------------+--------+-----+   +--------+--------------+
//!      |  next               ^  |               ^
//!      +---------------------+  +---------------+
//! ```
//!
//! Adjacent free blocks are never merged, and memory is only returned to the
//! OS when a heap is reset with [`RawAlloc::init`] or dropped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fit_allocator::{MmapChunks, RawAlloc, SearchMode};
//!
//! let mut heap = RawAlloc::new(MmapChunks::new(), SearchMode::BestFit);
//! let ptr = heap.alloc(64)?;
//! unsafe {
//!     ptr.as_ptr().write_bytes(0, 64);
//!     heap.free(ptr.as_ptr());
//! }
//! ```
//!
//! ## Safety
//!
//! `free` trusts its argument: passing anything other than a pointer returned
//! by `alloc` on the same heap is undefined behaviour and is not detected.

pub mod allocators;
pub mod block;
pub mod chain;
pub mod chunk;
pub mod fit;
mod split;

pub use crate::allocators::{LockedAlloc, OutOfMemory, RawAlloc};
pub use crate::block::{align, alloc_size, get_header, Block, HEADER_OVERHEAD};
pub use crate::chain::{Chain, Stats, Validity};
#[cfg(all(unix, feature = "use_libc"))]
pub use crate::chunk::MmapChunks;
pub use crate::chunk::{Chunk, ChunkError, ChunkProvider, ToyHeap, ToyHeapError};
pub use crate::fit::{ParseSearchModeError, SearchMode};
