//! Block selection strategies.
//!
//! All three walk the chain through `next` links, i.e. in creation order, and
//! only ever consider blocks that are free and whose stored size is at least
//! the (word aligned) request.

use core::fmt;
use core::ptr::NonNull;
use core::str::FromStr;

use log::trace;

use crate::block::Block;
use crate::chain::Chain;

/// Which strategy `find_block` uses. Chosen once per heap, at `init`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Take the first free block that is large enough.
    FirstFit,
    /// Like first-fit, but resume from the block found last time. The search
    /// does not wrap around to the start of the chain.
    NextFit,
    /// Take the smallest free block that is large enough.
    BestFit,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::FirstFit
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::FirstFit => "first-fit",
            SearchMode::NextFit => "next-fit",
            SearchMode::BestFit => "best-fit",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSearchModeError;

impl fmt::Display for ParseSearchModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected one of first-fit, next-fit or best-fit")
    }
}

impl FromStr for SearchMode {
    type Err = ParseSearchModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-fit" | "first" => Ok(SearchMode::FirstFit),
            "next-fit" | "next" => Ok(SearchMode::NextFit),
            "best-fit" | "best" => Ok(SearchMode::BestFit),
            _ => Err(ParseSearchModeError),
        }
    }
}

/// The outcome of a successful search.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fit {
    /// A block of exactly the requested size, already marked used.
    Exact(NonNull<Block>),
    /// A free block at least as large as the request, still to be split.
    Candidate(NonNull<Block>),
}

fn fits(block: &Block, size: usize) -> bool {
    !block.used && block.size >= size
}

/// Return the first free block of at least `size` bytes.
pub fn first_fit(chain: &Chain, size: usize) -> Option<Fit> {
    chain
        .iter()
        .find(|b| fits(unsafe { b.as_ref() }, size))
        .map(Fit::Candidate)
}

/// Return the first free block of at least `size` bytes at or after the
/// chain's search cursor, and move the cursor to it.
pub fn next_fit(chain: &mut Chain, size: usize) -> Option<Fit> {
    let start = chain.search_start.or(chain.heap_start);
    let found = chain
        .iter_from(start)
        .find(|b| fits(unsafe { b.as_ref() }, size))?;

    chain.search_start = Some(found);
    Some(Fit::Candidate(found))
}

/// Return the smallest free block of at least `size` bytes. The earliest
/// block wins a tie.
///
/// A block of exactly `size` bytes ends the search early: it is marked used
/// here and returned as [`Fit::Exact`].
pub fn best_fit(chain: &Chain, size: usize) -> Option<Fit> {
    let mut best: Option<NonNull<Block>> = None;
    let mut best_size = usize::MAX;

    for mut ptr in chain {
        let block = unsafe { ptr.as_mut() };
        if !fits(block, size) {
            continue;
        }

        if block.size == size {
            trace!("best-fit: exact match {:?}", block);
            block.used = true;
            return Some(Fit::Exact(ptr));
        }

        if block.size < best_size {
            best_size = block.size;
            best = Some(ptr);
        }
    }

    best.map(Fit::Candidate)
}

/// Search `chain` with the strategy `mode`.
pub fn find_block(chain: &mut Chain, mode: SearchMode, size: usize) -> Option<Fit> {
    let found = match mode {
        SearchMode::FirstFit => first_fit(chain, size),
        SearchMode::NextFit => next_fit(chain, size),
        SearchMode::BestFit => best_fit(chain, size),
    };
    trace!("{} for {} bytes: {:?}", mode, size, found);
    found
}
