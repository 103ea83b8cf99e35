#![cfg(all(unix, feature = "use_libc"))]

use std::thread;

use fit_allocator::{get_header, ChunkProvider, LockedAlloc, MmapChunks, RawAlloc, SearchMode};

use test_env_log::test;

static HEAP: LockedAlloc<MmapChunks> = LockedAlloc::new(MmapChunks::new(), SearchMode::NextFit);

#[test]
fn test_mmap_heap() {
    let mut heap = RawAlloc::new(MmapChunks::new(), SearchMode::BestFit);
    let page = heap.grower.page_size();

    // Larger than a page, to check the whole chunk is committed.
    let sizes = [1usize, 24, 3 * page, 100];
    let pointers: Vec<_> = sizes.iter().map(|&s| heap.alloc(s).unwrap()).collect();
    for (&ptr, &size) in pointers.iter().zip(sizes.iter()) {
        unsafe {
            ptr.as_ptr().write_bytes(0xEE, size);
            assert_eq!(ptr.as_ptr().add(size - 1).read(), 0xEE);
            assert_eq!(get_header(ptr).as_ref().size(), size);
        }
    }
    assert_eq!(heap.grower.growths(), sizes.len());

    unsafe { heap.free(pointers[2].as_ptr()) };
    let reused = heap.alloc(page).unwrap();
    // Carved from the tail of the freed block.
    let freed = unsafe { get_header(pointers[2]).as_ref() };
    assert_eq!(freed.next(), Some(unsafe { get_header(reused) }));
    assert!(!freed.is_used());
    assert_eq!(heap.grower.growths(), sizes.len());

    heap.init(SearchMode::FirstFit);
    assert_eq!(heap.grower.releases(), sizes.len());
    assert!(heap.chain().is_empty());
}

#[test]
fn test_shared_heap() {
    let workers: Vec<_> = (0..4u8)
        .map(|id| {
            thread::spawn(move || {
                for round in 0..200usize {
                    let size = 8 + (round * 13) % 300;
                    let ptr = HEAP.alloc(size).unwrap();
                    unsafe {
                        ptr.as_ptr().write_bytes(id, size);
                        let bytes = std::slice::from_raw_parts(ptr.as_ptr(), size);
                        assert!(bytes.iter().all(|&b| b == id));
                        HEAP.free(ptr.as_ptr());
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let (validity, stats) = HEAP.stats();
    assert!(validity.is_valid(), "{:?}", validity);
    assert_eq!(stats.used, 0);
}
