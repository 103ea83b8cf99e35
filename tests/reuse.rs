use core::ptr::NonNull;

use fit_allocator::{get_header, Block, RawAlloc, SearchMode, ToyHeap};

use test_env_log::test;

fn block(ptr: NonNull<u8>) -> &'static Block {
    unsafe { get_header(ptr).as_ref() }
}

#[test]
fn test_best_fit_regression() {
    let mut buffer = vec![0u8; 64 * 1024];
    let mut heap = RawAlloc::new(ToyHeap::new(&mut buffer, 4096), SearchMode::FirstFit);
    heap.init(SearchMode::BestFit);

    heap.alloc(8).unwrap();
    let a = heap.alloc(64).unwrap();
    heap.alloc(8).unwrap();
    let b = heap.alloc(16).unwrap();

    assert_eq!(block(a).size(), 64);
    assert_eq!(block(b).size(), 16);

    unsafe {
        heap.free(b.as_ptr());
        heap.free(a.as_ptr());
    }

    // An exact fit wins over the larger, earlier block.
    let c = heap.alloc(16).unwrap();
    assert_eq!(unsafe { get_header(c) }, unsafe { get_header(b) });

    // Only the 64 byte block is left; the new block is carved from it.
    let d = heap.alloc(16).unwrap();
    assert_eq!(Some(unsafe { get_header(d) }), block(a).next());
    assert!(!block(a).is_used());
    assert!(block(d).is_used());

    log::info!("blocks: {}", heap.chain());
    let (validity, stats) = heap.stats();
    assert!(validity.is_valid(), "{:?}", validity);
    assert_eq!(stats.length, 5);
    assert_eq!(stats.used, 4);
}

#[test]
fn test_first_fit_returns_most_recently_freed_slot() {
    let mut buffer = vec![0u8; 64 * 1024];
    let mut heap = RawAlloc::new(ToyHeap::new(&mut buffer, 1024), SearchMode::FirstFit);

    let pointers: Vec<_> = (0..6).map(|_| heap.alloc(48).unwrap()).collect();
    let grown = heap.grower.reserved;

    for &p in pointers.iter().rev() {
        unsafe { heap.free(p.as_ptr()) };
        let again = heap.alloc(48).unwrap();
        assert_eq!(unsafe { get_header(again) }, unsafe { get_header(p) });
        assert_eq!(block(again).size(), 48);
    }
    assert_eq!(heap.grower.reserved, grown);
}

#[test]
fn test_payloads_are_writable_and_disjoint() {
    for &mode in &[SearchMode::FirstFit, SearchMode::NextFit, SearchMode::BestFit] {
        let mut buffer = vec![0u8; 256 * 1024];
        let mut heap = RawAlloc::new(ToyHeap::new(&mut buffer, 512), mode);

        let mut live = Vec::new();
        for n in 0..40usize {
            let size = (n * 7) % 97;
            let ptr = heap.alloc(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % core::mem::size_of::<usize>(), 0);
            unsafe { ptr.as_ptr().write_bytes(n as u8, size) };
            live.push((ptr, size, n as u8));

            // Free every third allocation to give the search something to do.
            if n % 3 == 2 {
                let (p, _, _) = live.remove(n / 3);
                unsafe { heap.free(p.as_ptr()) };
            }
        }

        for &(ptr, size, fill) in &live {
            let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), size) };
            assert!(bytes.iter().all(|&b| b == fill), "{}: {:?} overwritten", mode, ptr);
        }
        assert!(heap.stats().0.is_valid());
        assert_eq!(heap.stats().1.used, live.len());
    }
}

#[test]
fn test_double_free_keeps_chain() {
    let mut buffer = vec![0u8; 64 * 1024];
    let mut heap = RawAlloc::new(ToyHeap::new(&mut buffer, 256), SearchMode::BestFit);

    let big = heap.alloc(160).unwrap();
    unsafe { heap.free(big.as_ptr()) };
    let carved = heap.alloc(24).unwrap();
    unsafe { heap.free(carved.as_ptr()) };

    let before: Vec<_> = heap
        .chain()
        .iter()
        .map(|b| {
            let b = unsafe { b.as_ref() };
            (b.next(), b.size(), b.is_used())
        })
        .collect();

    unsafe { heap.free(carved.as_ptr()) };

    let after: Vec<_> = heap
        .chain()
        .iter()
        .map(|b| {
            let b = unsafe { b.as_ref() };
            (b.next(), b.size(), b.is_used())
        })
        .collect();
    assert_eq!(before, after);
    assert!(after.iter().all(|&(_, _, used)| !used));
}
