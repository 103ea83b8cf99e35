//! Sources of raw memory.
//!
//! ### [`ChunkProvider`](trait.ChunkProvider.html)
//!
//! `ChunkProvider` is a small trait interface meant to abstract over the calls
//! to the OS to reserve, commit and release virtual memory.
//!
//! ### [`MmapChunks`](struct.MmapChunks.html)
//!
//! Uses `mmap`, `mprotect` and `munmap` through libc. Only on unix, with the
//! `use_libc` feature (on by default).
//!
//! ### [`ToyHeap`](struct.ToyHeap.html)
//!
//! `ToyHeap` hands out pages of a caller-provided buffer and can pretend that
//! committing memory fails. It is mainly useful for testing.

use core::fmt;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;

use log::{debug, warn};

use crate::block::{Block, HEADER_OVERHEAD, WORD};

// Round up value to the nearest multiple of increment, or None on overflow
fn round_up(value: usize, increment: usize) -> Option<usize> {
    if value == 0 {
        return Some(0);
    }
    ((value - 1) / increment).checked_add(1)?.checked_mul(increment)
}

/// A page-granular region of committed, writable memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub start: NonNull<u8>,
    pub len: usize,
}

/// Why `reserve_and_commit` failed.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkError<E> {
    /// The request was too large to express as a page count.
    Overflow,
    /// The address range could not be reserved.
    Reserve(E),
    /// The range was reserved, but making it writable failed. The
    /// reservation has been released again.
    Commit(E),
}

impl<E: fmt::Debug> fmt::Display for ChunkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkError::Overflow => write!(f, "chunk size overflows"),
            ChunkError::Reserve(e) => write!(f, "reserving address space failed: {:?}", e),
            ChunkError::Commit(e) => write!(f, "committing reserved memory failed: {:?}", e),
        }
    }
}

pub trait ChunkProvider {
    type Err: fmt::Debug;

    /// Granularity of every chunk. Must be a multiple of the machine word.
    fn page_size(&self) -> usize;

    /// Reserve `len` bytes of address space with no access rights.
    ///
    /// # Safety
    ///
    /// `len` must be a non-zero multiple of `page_size()`.
    unsafe fn reserve(&mut self, len: usize) -> Result<NonNull<u8>, Self::Err>;

    /// Grant read/write access to `len` bytes at `start`.
    ///
    /// # Safety
    ///
    /// `start..start + len` must lie inside a range returned by `reserve`
    /// and not yet released.
    unsafe fn commit(&mut self, start: NonNull<u8>, len: usize) -> Result<(), Self::Err>;

    /// Hand `len` bytes at `start` back.
    ///
    /// # Safety
    ///
    /// `start` and `len` must be exactly a range returned by `reserve`, and
    /// nothing may touch that memory afterwards.
    unsafe fn release(&mut self, start: NonNull<u8>, len: usize) -> Result<(), Self::Err>;

    /// Get a writable chunk large enough for a block header plus
    /// `payload_size` bytes of payload, rounded up to whole pages.
    ///
    /// The whole chunk is committed, header included. If committing fails,
    /// the reservation is released before the error is returned.
    ///
    /// # Safety
    ///
    /// The returned memory is untracked: the caller becomes responsible for
    /// eventually releasing it.
    unsafe fn reserve_and_commit(&mut self, payload_size: usize) -> Result<Chunk, ChunkError<Self::Err>> {
        let bytes = payload_size
            .checked_add(HEADER_OVERHEAD)
            .ok_or(ChunkError::Overflow)?
            .max(size_of::<Block>());
        let len = round_up(bytes, self.page_size()).ok_or(ChunkError::Overflow)?;

        let start = self.reserve(len).map_err(ChunkError::Reserve)?;
        if let Err(e) = self.commit(start, len) {
            if let Err(release_err) = self.release(start, len) {
                warn!(
                    "leaking {} bytes at {:?}: release after failed commit: {:?}",
                    len, start, release_err
                );
            }
            return Err(ChunkError::Commit(e));
        }

        debug!("new chunk of {} bytes at {:?}", len, start);
        Ok(Chunk { start, len })
    }
}

/// MmapChunks uses virtual memory to back the heap upon request.
#[cfg(all(unix, feature = "use_libc"))]
#[derive(Default, Debug)]
pub struct MmapChunks {
    // Just for tracking, not really needed
    pages: usize,
    growths: usize,
    releases: usize,
}

#[cfg(all(unix, feature = "use_libc"))]
impl MmapChunks {
    pub const fn new() -> Self {
        MmapChunks {
            pages: 0,
            growths: 0,
            releases: 0,
        }
    }

    /// Pages committed so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Chunks committed so far.
    pub fn growths(&self) -> usize {
        self.growths
    }

    /// Reservations unmapped so far.
    pub fn releases(&self) -> usize {
        self.releases
    }
}

#[cfg(all(unix, feature = "use_libc"))]
impl ChunkProvider for MmapChunks {
    type Err = errno::Errno;

    fn page_size(&self) -> usize {
        sysconf::page::pagesize()
    }

    unsafe fn reserve(&mut self, len: usize) -> Result<NonNull<u8>, Self::Err> {
        let ptr = libc::mmap(
            // Address we want the memory at. We don't care, so null it is.
            core::ptr::null_mut(),
            len,
            // No access until committed.
            libc::PROT_NONE,
            // MAP_ANON: We don't want a file descriptor, we're just going to
            //   use the memory.
            //
            // MAP_PRIVATE: We're not sharing this with any other process.
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        );

        if ptr == libc::MAP_FAILED {
            return Err(errno::errno());
        }

        NonNull::new(ptr as *mut u8).ok_or(errno::Errno(libc::ENOMEM))
    }

    unsafe fn commit(&mut self, start: NonNull<u8>, len: usize) -> Result<(), Self::Err> {
        let rc = libc::mprotect(
            start.as_ptr() as *mut libc::c_void,
            len,
            libc::PROT_READ | libc::PROT_WRITE,
        );
        if rc != 0 {
            return Err(errno::errno());
        }

        self.pages += len / self.page_size();
        self.growths += 1;
        Ok(())
    }

    unsafe fn release(&mut self, start: NonNull<u8>, len: usize) -> Result<(), Self::Err> {
        if libc::munmap(start.as_ptr() as *mut libc::c_void, len) != 0 {
            return Err(errno::errno());
        }
        self.releases += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToyHeapError {
    /// The buffer has no room left for the reservation.
    Overflow,
    /// A commit was refused through [`ToyHeap::fail_next_commits`].
    CommitRefused,
}

/// A fake OS handing out pages of a borrowed buffer, front to back.
///
/// Released pages are counted but never handed out again.
pub struct ToyHeap<'a> {
    start: NonNull<u8>,
    capacity: usize,
    pub page_size: usize,
    /// Bytes reserved so far.
    pub reserved: usize,
    /// Bytes committed so far.
    pub committed: usize,
    /// Bytes released so far.
    pub released: usize,
    failing_commits: usize,
    _buffer: PhantomData<&'a mut [u8]>,
}

// The ToyHeap has exclusive use of its buffer, like the `&mut` it was built
// from.
unsafe impl Send for ToyHeap<'_> {}

impl<'a> ToyHeap<'a> {
    /// Serve pages of `page_size` bytes out of `buffer`. Bytes before the
    /// first word-aligned address are skipped.
    ///
    /// Panics if `page_size` is not a non-zero multiple of the machine word.
    pub fn new(buffer: &'a mut [u8], page_size: usize) -> Self {
        if page_size == 0 || page_size % WORD != 0 {
            panic!("ToyHeap page size {} is not a multiple of {}", page_size, WORD);
        }

        let skip = buffer.as_ptr().align_offset(WORD).min(buffer.len());
        let capacity = buffer.len() - skip;
        // `skip` stays inside the buffer, and a slice pointer is never null.
        let start = unsafe { NonNull::new_unchecked(buffer.as_mut_ptr().add(skip)) };

        ToyHeap {
            start,
            capacity,
            page_size,
            reserved: 0,
            committed: 0,
            released: 0,
            failing_commits: 0,
            _buffer: PhantomData,
        }
    }

    /// Make the next `count` commits fail.
    pub fn fail_next_commits(&mut self, count: usize) {
        self.failing_commits = count;
    }

    /// Bytes reserved and not released.
    pub fn in_use(&self) -> usize {
        self.reserved - self.released
    }

    /// Bytes left in the buffer.
    pub fn remaining(&self) -> usize {
        self.capacity - self.reserved
    }
}

impl ChunkProvider for ToyHeap<'_> {
    type Err = ToyHeapError;

    fn page_size(&self) -> usize {
        self.page_size
    }

    unsafe fn reserve(&mut self, len: usize) -> Result<NonNull<u8>, Self::Err> {
        if len > self.remaining() {
            return Err(ToyHeapError::Overflow);
        }
        let ptr = NonNull::new_unchecked(self.start.as_ptr().add(self.reserved));
        self.reserved += len;
        Ok(ptr)
    }

    unsafe fn commit(&mut self, _start: NonNull<u8>, len: usize) -> Result<(), Self::Err> {
        if self.failing_commits > 0 {
            self.failing_commits -= 1;
            return Err(ToyHeapError::CommitRefused);
        }
        self.committed += len;
        Ok(())
    }

    unsafe fn release(&mut self, _start: NonNull<u8>, len: usize) -> Result<(), Self::Err> {
        self.released += len;
        Ok(())
    }
}
