use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::block::{Block, WORD};

/// A `Chain` is the singly linked list of every block the allocator has
/// created, used and free alike.
///
/// Blocks are linked in creation order: a block grown from a new chunk is
/// appended at `top`, and a block carved out of another is linked directly
/// after its parent. Blocks are never unlinked.
///
/// It maintains a few internal invariants:
///
/// - `heap_start` is `None` exactly when `top` is `None`.
/// - Following `next` from `heap_start` reaches `top`, whose `next` is `None`.
/// - `search_start`, when set, is a block of this chain.
/// - Blocks carved from a chunk sit between that chunk's first block and the
///   next chunk's first block.
pub struct Chain {
    pub(crate) heap_start: Option<NonNull<Block>>,
    pub(crate) top: Option<NonNull<Block>>,
    pub(crate) search_start: Option<NonNull<Block>>,
}

/// Iterator over the blocks of a [`Chain`], following `next` links.
pub struct Blocks<'chain> {
    next: Option<NonNull<Block>>,
    _chain: PhantomData<&'chain Chain>,
}

impl<'chain> Iterator for Blocks<'chain> {
    type Item = NonNull<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next.take()?;
        self.next = unsafe { block.as_ref() }.next;
        Some(block)
    }
}

impl Default for Chain {
    fn default() -> Self {
        Chain::new()
    }
}

impl<'chain> IntoIterator for &'chain Chain {
    type Item = NonNull<Block>;
    type IntoIter = Blocks<'chain>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain(")?;
        let mut start = true;
        for block in self {
            if !start {
                write!(f, ", ")?;
            } else {
                start = false;
            }
            write!(f, "{:?}", unsafe { block.as_ref() })?;
        }

        write!(f, ")")
    }
}

/// Validity contains a representation of all invalid states found in a
/// Chain.
#[derive(Default, Debug)]
pub struct Validity {
    /// Number of pairs of blocks whose memory overlaps.
    ///
    /// This indicates corruption.
    pub overlaps: usize,

    /// Number of blocks whose payload is not word aligned.
    pub misaligned: usize,

    /// Set when the last block reached from `heap_start` is not `top`.
    pub detached_top: bool,
}

impl Validity {
    /// Returns a boolean - a simple check that nothing invalid was found
    pub fn is_valid(&self) -> bool {
        self.overlaps == 0 && self.misaligned == 0 && !self.detached_top
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

#[derive(Default, Debug, PartialEq, Eq)]
pub struct Stats {
    /// Number of blocks in the chain.
    pub length: usize,
    pub used: usize,
    pub free: usize,
    /// Sum of the stored sizes of used blocks.
    pub used_bytes: usize,
    /// Sum of the stored sizes of free blocks.
    pub free_bytes: usize,
}

impl Chain {
    pub const fn new() -> Self {
        Chain {
            heap_start: None,
            top: None,
            search_start: None,
        }
    }

    /// Forget every block. The memory behind them is not touched.
    pub fn clear(&mut self) {
        self.heap_start = None;
        self.top = None;
        self.search_start = None;
    }

    /// The first block ever created.
    pub fn head(&self) -> Option<NonNull<Block>> {
        self.heap_start
    }

    /// The most recently appended block.
    pub fn top(&self) -> Option<NonNull<Block>> {
        self.top
    }

    /// Where the next next-fit search will begin.
    pub fn search_start(&self) -> Option<NonNull<Block>> {
        self.search_start
    }

    pub fn iter(&self) -> Blocks<'_> {
        self.iter_from(self.heap_start)
    }

    /// Iterate from `start` to the end of the chain.
    pub(crate) fn iter_from(&self, start: Option<NonNull<Block>>) -> Blocks<'_> {
        Blocks {
            next: start,
            _chain: PhantomData,
        }
    }

    /// Link `block` at the end of the chain.
    ///
    /// # Safety
    ///
    /// `block` must point to a live header that is not already in the chain.
    pub(crate) unsafe fn append(&mut self, mut block: NonNull<Block>) {
        block.as_mut().next = None;
        match self.top {
            None => self.heap_start = Some(block),
            Some(mut top) => top.as_mut().next = Some(block),
        }
        self.top = Some(block);
    }

    /// Link `block` directly after `prev`.
    ///
    /// # Safety
    ///
    /// `prev` must be a block of this chain and `block` a live header that is
    /// not.
    pub(crate) unsafe fn insert_after(&mut self, mut prev: NonNull<Block>, mut block: NonNull<Block>) {
        block.as_mut().next = prev.as_mut().next.take();
        prev.as_mut().next = Some(block);
        if self.top == Some(prev) {
            self.top = Some(block);
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.heap_start.is_none()
    }

    /// Check current size of the chain, and whether it's valid.
    ///
    /// The overlap check compares every pair of blocks, so this is quadratic
    /// in the length of the chain.
    pub fn stats(&self) -> (Validity, Stats) {
        let mut validity: Validity = Default::default();
        let mut stats: Stats = Default::default();

        let mut last = None;
        for (i, ptr) in self.iter().enumerate() {
            let block = unsafe { ptr.as_ref() };

            if block.used {
                stats.used += 1;
                stats.used_bytes += block.size;
            } else {
                stats.free += 1;
                stats.free_bytes += block.size;
            }
            stats.length += 1;

            if Block::payload(ptr).as_ptr() as usize % WORD != 0 {
                validity.misaligned += 1;
            }

            let extent = block.extent();
            for other in self.iter().skip(i + 1) {
                let other = unsafe { other.as_ref() }.extent();
                if extent.start < other.end && other.start < extent.end {
                    validity.overlaps += 1;
                }
            }

            last = Some(ptr);
        }

        validity.detached_top = last != self.top;

        (validity, stats)
    }
}
