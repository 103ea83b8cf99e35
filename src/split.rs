use core::ptr::NonNull;

use log::trace;

use crate::block::{alloc_size, Block, WORD};
use crate::chain::Chain;

/// Whether `remainder` bytes left over after carving are worth keeping as a
/// free block: at least one word, and a whole number of words so the carved
/// header lands word aligned.
fn is_useful_remainder(remainder: usize) -> bool {
    remainder >= WORD && remainder % WORD == 0
}

/// Turn the free block `block`, found by a fit strategy, into a used block of
/// at least `size` bytes, and return it.
///
/// - If `block` is exactly `size` bytes, it is reused as is.
/// - If enough is left over, a new used block of `size` bytes is carved from
///   the tail of `block`'s payload and linked right after it; `block` shrinks
///   and stays free.
/// - Otherwise all of `block` is handed out, size unchanged.
///
/// # Safety
///
/// `block` must be a free block of `chain` with `size() >= size`, and `size`
/// must be word aligned.
pub(crate) unsafe fn split(chain: &mut Chain, mut block: NonNull<Block>, size: usize) -> NonNull<Block> {
    let header = block.as_mut();
    debug_assert!(!header.used && header.size >= size);

    if header.size == size {
        header.used = true;
        trace!("reusing {:?}", header);
        return block;
    }

    match header.size.checked_sub(alloc_size(size)) {
        Some(remainder) if is_useful_remainder(remainder) => {
            let at = Block::payload(block).as_ptr().add(remainder);
            let carved = Block::write(NonNull::new_unchecked(at), size, 0);
            header.size = remainder;
            chain.insert_after(block, carved);
            trace!("split {:?} off {:?}", carved.as_ref(), block.as_ref());
            carved
        }
        _ => {
            header.used = true;
            trace!("handing out all of {:?} for {} bytes", header, size);
            block
        }
    }
}
