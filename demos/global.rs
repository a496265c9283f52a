//! Runs a small program on top of [`OsMem`] and shows where its memory ends up: which
//! requests are mapped, which resizes stay in place, and what the directory looks like
//! at the end.

use std::alloc::{GlobalAlloc, Layout};

use osmem::{BlockInfo, OsMem};

#[global_allocator]
static ALLOCATOR: OsMem = OsMem::new();

/// Copies the directory out while the heap is locked. Nothing may allocate under the
/// lock, so the buffer is sized up front and extra blocks are dropped.
fn snapshot() -> Vec<BlockInfo> {
    let mut blocks = Vec::with_capacity(256);
    let heap = ALLOCATOR.lock();

    for block in heap.blocks().take(blocks.capacity()) {
        blocks.push(block);
    }

    drop(heap);
    blocks
}

fn report(what: &str, old: *mut u8, new: *mut u8) {
    let outcome = if old == new { "in place" } else { "moved" };
    println!("{what}: {old:p} -> {new:p} ({outcome})");
}

fn main() {
    let words: Vec<u64> = (0..16).collect();
    println!("small vec at {:p}", words.as_ptr());

    let big = vec![0u8; 512 * 1024];
    let status = snapshot()
        .into_iter()
        .find(|block| block.payload.as_ptr() == big.as_ptr().cast_mut())
        .map(|block| block.status);
    println!("512 KiB buffer at {:p}: {status:?}", big.as_ptr());
    drop(big);

    unsafe {
        let layout = Layout::from_size_align(64, 8).unwrap();

        let a = ALLOCATOR.alloc(layout);
        let b = ALLOCATOR.alloc(layout);

        // Shrinking always keeps the block where it is.
        let shrunk = ALLOCATOR.realloc(a, layout, 32);
        report("shrink a to 32", a, shrunk);

        // `b` sits right behind `a`, so growing `a` needs a new home.
        let small = Layout::from_size_align(32, 8).unwrap();
        let grown = ALLOCATOR.realloc(shrunk, small, 1024);
        report("grow a to 1024", shrunk, grown);

        // The freed span of `a` is now in front of `b`, which is free to grow into
        // whatever follows it.
        let grown_b = ALLOCATOR.realloc(b, layout, 96);
        report("grow b to 96", b, grown_b);

        ALLOCATOR.dealloc(grown, Layout::from_size_align(1024, 8).unwrap());
        ALLOCATOR.dealloc(grown_b, Layout::from_size_align(96, 8).unwrap());
    }

    let blocks = snapshot();
    let total: usize = blocks.iter().map(BlockInfo::footprint).sum();

    println!("\n{} blocks spanning {total} bytes:", blocks.len());
    for block in &blocks {
        println!("  {:p} {:>8} bytes {:?}", block.payload, block.size, block.status);
    }

    drop(words);
}
