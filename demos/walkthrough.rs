//! Walk through a few allocations with a chosen strategy and print the chain
//! after each step.
//!
//! ```text
//! RUST_LOG=trace cargo run --example walkthrough -- best-fit
//! ```

use std::env;
use std::process;

use fit_allocator::{get_header, MmapChunks, RawAlloc, SearchMode};

fn main() {
    env_logger::init();

    let mode: SearchMode = match env::args().nth(1) {
        None => SearchMode::default(),
        Some(arg) => match arg.parse() {
            Ok(mode) => mode,
            Err(e) => {
                eprintln!("{}: {}", arg, e);
                process::exit(2);
            }
        },
    };

    let mut heap = RawAlloc::new(MmapChunks::new(), mode);
    println!("Using {}", mode);

    let small = heap.alloc(8).expect("alloc 8");
    let a = heap.alloc(64).expect("alloc 64");
    let _spacer = heap.alloc(8).expect("alloc 8");
    let b = heap.alloc(16).expect("alloc 16");
    println!("[1] four blocks:      {}", heap.chain());

    unsafe {
        heap.free(b.as_ptr());
        heap.free(a.as_ptr());
    }
    println!("[2] freed 64 and 16:  {}", heap.chain());

    let c = heap.alloc(16).expect("alloc 16");
    println!(
        "[3] alloc 16 -> {:?}: {}",
        unsafe { get_header(c) },
        heap.chain()
    );

    let d = heap.alloc(16).expect("alloc 16");
    println!(
        "[4] alloc 16 -> {:?}: {}",
        unsafe { get_header(d) },
        heap.chain()
    );

    unsafe { heap.free(small.as_ptr()) };
    let (validity, stats) = heap.stats();
    println!("[5] {:?} {:?}", validity, stats);
    println!(
        "    {} pages mapped in {} chunks",
        heap.grower.pages(),
        heap.grower.growths()
    );
}
