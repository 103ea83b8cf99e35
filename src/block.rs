//! Block headers and the arithmetic relating a header to its payload.
//!
//! Every allocation is a [`Block`] header immediately followed by the bytes
//! handed to the caller. The header's last field and the payload share one
//! machine word:
//!
//! ```text
//!   header                                       payload pointer
//!   |                                            |
//!   v                                            v
//!   +--------+--------+--------+-----------+-----+----------------+
//!   |  size  |  used  |  next  | chunk_len | data ...             |
//!   +--------+--------+--------+-----------+-----+----------------+
//!   |<------------ HEADER_OVERHEAD ------->|
//!   |<--------------- size_of::<Block>() ------->|
//! ```
//!
//! All offsets are derived from the layout of [`Block`], so changing the
//! header keeps [`get_header`], [`Block::payload`] and [`alloc_size`] in
//! agreement.

use core::fmt;
use core::mem::{align_of, offset_of, size_of};
use core::ops::Range;
use core::ptr::NonNull;

use static_assertions::const_assert;

/// The size of a machine word. Payloads are aligned to this.
pub const WORD: usize = size_of::<usize>();

/// The header written in front of every payload.
///
/// `size` is the payload size the block was created or last resized for, not
/// the header-inclusive size. `next` links blocks in creation / split order,
/// never in address order.
#[repr(C)]
pub struct Block {
    pub(crate) size: usize,
    pub(crate) used: bool,
    pub(crate) next: Option<NonNull<Block>>,
    // Length of the OS chunk starting at this header, or 0 for a block carved
    // out of another block.
    pub(crate) chunk_len: usize,
    // First word of the payload.
    data: usize,
}

/// Bytes between a header's address and its payload pointer.
pub const HEADER_OVERHEAD: usize = size_of::<Block>() - WORD;

const_assert!(align_of::<Block>() == WORD);
const_assert!(HEADER_OVERHEAD % WORD == 0);
const_assert!(offset_of!(Block, data) == HEADER_OVERHEAD);

/// Round `n` up to the next multiple of the machine word.
///
/// ```rust
/// use fit_allocator::align;
///
/// match core::mem::size_of::<usize>() {
///     8 => assert_eq!(align(13), 16), // 64 bit machine.
///     4 => assert_eq!(align(11), 12), // 32 bit machine.
///     _ => {}
/// };
/// ```
pub const fn align(n: usize) -> usize {
    (n + WORD - 1) & !(WORD - 1)
}

/// Like [`align`], but `None` instead of wrapping around.
pub(crate) fn checked_align(n: usize) -> Option<usize> {
    n.checked_add(WORD - 1).map(|n| n & !(WORD - 1))
}

/// Total bytes needed for a header plus a payload of `size` bytes, given the
/// one word they share.
pub const fn alloc_size(size: usize) -> usize {
    size + HEADER_OVERHEAD
}

/// Find the header belonging to a payload pointer.
///
/// # Safety
///
/// `payload` must be a pointer previously returned by an allocator in this
/// crate, and that allocator must still own the memory behind it.
pub unsafe fn get_header(payload: NonNull<u8>) -> NonNull<Block> {
    NonNull::new_unchecked(payload.as_ptr().sub(HEADER_OVERHEAD)).cast()
}

impl Block {
    /// Write a fresh, used header at `at`, returning a pointer to it.
    ///
    /// # Safety
    ///
    /// `at` must be word aligned and point to at least
    /// `alloc_size(max(size, WORD))` writable bytes not tracked by any live
    /// block.
    pub(crate) unsafe fn write(at: NonNull<u8>, size: usize, chunk_len: usize) -> NonNull<Block> {
        let header: NonNull<Block> = at.cast();
        header.as_ptr().write(Block {
            size,
            used: true,
            next: None,
            chunk_len,
            data: 0,
        });
        header
    }

    /// The payload pointer for a header. Inverse of [`get_header`].
    pub fn payload(header: NonNull<Block>) -> NonNull<u8> {
        // A header is never placed at the very top of the address space, so
        // adding the overhead cannot produce null.
        unsafe { NonNull::new_unchecked((header.as_ptr() as *mut u8).add(HEADER_OVERHEAD)) }
    }

    /// The payload size stored in this header.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    /// The block created (or carved) after this one, if any.
    pub fn next(&self) -> Option<NonNull<Block>> {
        self.next
    }

    /// Length of the OS chunk that starts at this header, or 0.
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Address range of the payload, as recorded by `size`.
    pub fn payload_range(&self) -> Range<*const u8> {
        let start = Block::payload(NonNull::from(self)).as_ptr() as *const u8;
        start..start.wrapping_add(self.size)
    }

    /// Address range from the header to the end of the word-rounded payload.
    /// This is the memory a block occupies, whatever `size` says.
    pub(crate) fn extent(&self) -> Range<*const u8> {
        let start = self as *const Block as *const u8;
        let payload = align(if self.size == 0 { 1 } else { self.size });
        start..start.wrapping_add(alloc_size(payload))
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block({:?}, {}, {})",
            self as *const Block,
            self.size,
            if self.used { "used" } else { "free" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        let mut alignments = Vec::new();

        for i in 0..10 {
            let sizes = (WORD * i + 1)..=(WORD * (i + 1));
            alignments.push((sizes, WORD * (i + 1)));
        }

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, align(size));
            }
        }
        assert_eq!(align(0), 0);
    }

    #[test]
    fn test_checked_align() {
        assert_eq!(checked_align(1), Some(WORD));
        assert_eq!(checked_align(usize::MAX), None);
    }

    #[test]
    fn test_overhead_is_one_word_short_of_header() {
        assert_eq!(HEADER_OVERHEAD + WORD, size_of::<Block>());
        assert_eq!(alloc_size(64), 64 + size_of::<Block>() - WORD);
    }

    #[test]
    fn test_header_payload_inverse() {
        let mut buf = [0usize; 16];
        let at = NonNull::new(buf.as_mut_ptr() as *mut u8).unwrap();
        let header = unsafe { Block::write(at, 24, 0) };
        let payload = Block::payload(header);

        assert_eq!(payload.as_ptr() as usize - at.as_ptr() as usize, HEADER_OVERHEAD);
        assert_eq!(payload.as_ptr() as usize % WORD, 0);
        assert_eq!(unsafe { get_header(payload) }, header);

        let block = unsafe { header.as_ref() };
        assert_eq!(block.size(), 24);
        assert!(block.is_used());
        assert!(block.next().is_none());
        assert_eq!(block.payload_range().start, payload.as_ptr() as *const u8);
    }

    #[test]
    fn test_zero_size_extent_covers_a_word() {
        let mut buf = [0usize; 16];
        let at = NonNull::new(buf.as_mut_ptr() as *mut u8).unwrap();
        let header = unsafe { Block::write(at, 0, 0) };
        let extent = unsafe { header.as_ref() }.extent();
        assert_eq!(extent.end as usize - extent.start as usize, size_of::<Block>());
    }
}
