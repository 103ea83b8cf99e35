//! The allocator façade.
//!
//! ## Basic Types
//!
//! ### [`RawAlloc`](struct.RawAlloc.html)
//!
//! A `RawAlloc` is a single-threaded heap: it owns a [`ChunkProvider`], the
//! chain of blocks carved from the chunks it obtained, and the configured
//! [`SearchMode`]. Each `RawAlloc` is an independent heap.
//!
//! ### [`LockedAlloc`](struct.LockedAlloc.html)
//!
//! A `LockedAlloc` wraps `RawAlloc` with a spin lock, so that a whole
//! find → split/grow sequence runs under one lock. Its constructor is
//! `const`, so a process-wide heap can live in a `static`.

use core::fmt;
use core::ptr::NonNull;

use log::{debug, trace, warn};
use spin::{Mutex, MutexGuard};

use crate::block::{checked_align, get_header, Block};
use crate::chain::{Chain, Stats, Validity};
use crate::chunk::ChunkProvider;
use crate::fit::{self, Fit, SearchMode};
use crate::split;

/// The only way `alloc` fails: the provider could not supply a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory {
    /// The size passed to `alloc`.
    pub requested: usize,
}

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out of memory allocating {} bytes", self.requested)
    }
}

/// A raw allocator, capable of growing the heap, returning pointers to new
/// allocations, and tracking and reusing freed memory.
///
/// Freed blocks stay in the chain for reuse. Adjacent free blocks are not
/// merged, and memory only goes back to the provider on [`init`] or drop.
///
/// [`init`]: RawAlloc::init
pub struct RawAlloc<G: ChunkProvider> {
    pub grower: G,
    chain: Chain,
    search_mode: SearchMode,
}

// The chain only points into chunks owned by this allocator, so the whole
// thing can move between threads along with its provider.
unsafe impl<G: ChunkProvider + Send> Send for RawAlloc<G> {}

impl<G: ChunkProvider> Drop for RawAlloc<G> {
    fn drop(&mut self) {
        self.release_chunks();
    }
}

impl<G: ChunkProvider + Default> Default for RawAlloc<G> {
    fn default() -> Self {
        RawAlloc::new(G::default(), SearchMode::default())
    }
}

impl<G: ChunkProvider> RawAlloc<G> {
    /// Create an empty heap drawing chunks from `grower`.
    pub const fn new(grower: G, search_mode: SearchMode) -> Self {
        RawAlloc {
            grower,
            chain: Chain::new(),
            search_mode,
        }
    }

    /// Start over with strategy `search_mode`.
    ///
    /// Every chunk obtained so far is released, so all pointers handed out
    /// before this call become dangling.
    pub fn init(&mut self, search_mode: SearchMode) {
        self.release_chunks();
        self.search_mode = search_mode;
        debug!("heap reset, searching with {}", search_mode);
    }

    pub fn search_mode(&self) -> SearchMode {
        self.search_mode
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Get statistics on this allocator, and verify validity of the Chain
    pub fn stats(&self) -> (Validity, Stats) {
        self.chain.stats()
    }

    /// Allocate at least `size` writable bytes, aligned to the machine word.
    ///
    /// A `size` of 0 still gets a distinct, word-sized block.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        let total = checked_align(size.max(1)).ok_or(OutOfMemory { requested: size })?;

        let block = match fit::find_block(&mut self.chain, self.search_mode, total) {
            Some(Fit::Exact(block)) => block,
            Some(Fit::Candidate(block)) => unsafe { split::split(&mut self.chain, block, total) },
            None => self.grow(size, total)?,
        };

        Ok(Block::payload(block))
    }

    /// Put a new block of `size` bytes at the start of a fresh chunk large
    /// enough for `total` bytes, and append it to the chain.
    fn grow(&mut self, size: usize, total: usize) -> Result<NonNull<Block>, OutOfMemory> {
        let chunk = unsafe { self.grower.reserve_and_commit(total) }.map_err(|e| {
            debug!("no chunk for {} bytes: {}", size, e);
            OutOfMemory { requested: size }
        })?;

        let block = unsafe {
            let block = Block::write(chunk.start, size, chunk.len);
            self.chain.append(block);
            block
        };
        trace!("created {:?}", unsafe { block.as_ref() });
        Ok(block)
    }

    /// Deallocate (or "free") a memory block. Null is ignored, and freeing a
    /// block twice changes nothing the second time.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by `alloc` on this allocator
    /// since its last `init`. Anything else is undefined behaviour.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let payload = match NonNull::new(ptr) {
            Some(p) => p,
            None => return,
        };

        let block = get_header(payload).as_mut();
        if !block.used {
            trace!("{:?} was already free", block);
        }
        block.used = false;
        trace!("freed {:?}", block);
    }

    /// Hand every chunk back to the provider and empty the chain.
    fn release_chunks(&mut self) {
        // Blocks carved from a chunk follow its first block in the chain, so
        // a chunk is done with once the next chunk's first block is reached.
        let mut pending: Option<(NonNull<u8>, usize)> = None;
        let mut next = self.chain.head();

        while let Some(block) = next {
            let (following, chunk_len) = {
                let b = unsafe { block.as_ref() };
                (b.next, b.chunk_len)
            };
            if chunk_len > 0 {
                if let Some((start, len)) = pending.replace((block.cast(), chunk_len)) {
                    self.release_chunk(start, len);
                }
            }
            next = following;
        }

        if let Some((start, len)) = pending {
            self.release_chunk(start, len);
        }
        self.chain.clear();
    }

    fn release_chunk(&mut self, start: NonNull<u8>, len: usize) {
        match unsafe { self.grower.release(start, len) } {
            Ok(()) => debug!("released chunk of {} bytes at {:?}", len, start),
            Err(e) => warn!("leaking chunk of {} bytes at {:?}: {:?}", len, start, e),
        }
    }
}

/// A thread-safe allocator, using a spin lock around a RawAlloc.
pub struct LockedAlloc<G: ChunkProvider> {
    raw: Mutex<RawAlloc<G>>,
}

impl<G: ChunkProvider + Default> Default for LockedAlloc<G> {
    fn default() -> Self {
        LockedAlloc {
            raw: Mutex::new(RawAlloc::default()),
        }
    }
}

impl<G: ChunkProvider> LockedAlloc<G> {
    pub const fn new(grower: G, search_mode: SearchMode) -> Self {
        LockedAlloc {
            raw: Mutex::new(RawAlloc::new(grower, search_mode)),
        }
    }

    /// Get a reference to the underlying RawAlloc.
    ///
    /// Every other caller spins until the guard is dropped.
    pub fn lock(&self) -> MutexGuard<'_, RawAlloc<G>> {
        self.raw.lock()
    }

    /// See [`RawAlloc::init`].
    pub fn init(&self, search_mode: SearchMode) {
        self.lock().init(search_mode)
    }

    /// See [`RawAlloc::alloc`].
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        self.lock().alloc(size)
    }

    /// See [`RawAlloc::free`].
    ///
    /// # Safety
    ///
    /// As for [`RawAlloc::free`].
    pub unsafe fn free(&self, ptr: *mut u8) {
        self.lock().free(ptr)
    }

    pub fn stats(&self) -> (Validity, Stats) {
        self.lock().stats()
    }
}
