//! Drives a [`Heap`] by hand and prints its directory after every step.

use osmem::{Heap, ReservedBreak};

fn dump(heap: &Heap<ReservedBreak>, step: &str) {
    println!("{step}:");
    for block in heap.blocks() {
        println!("  {:p} {:>8} bytes {:?}", block.payload, block.size, block.status);
    }
}

fn main() {
    let mut heap = Heap::with_kernel(ReservedBreak::new(1 << 20).unwrap());

    unsafe {
        let a = heap.allocate(8).unwrap();
        let b = heap.allocate(100).unwrap();
        let c = heap.allocate(16).unwrap();
        dump(&heap, "three small blocks");

        heap.free(Some(a));
        heap.free(Some(b));
        dump(&heap, "first two freed and merged");

        let d = heap.allocate(64).unwrap();
        println!("reused {:p} for d: {}", d, d == a);

        let big = heap.allocate(256 * 1024).unwrap();
        dump(&heap, "big request mapped");

        let c = heap.resize(Some(c), 4096).unwrap();
        dump(&heap, "c grown");

        let zeroed = heap.zero_allocate(64, 8).unwrap();
        println!("zeroed block at {zeroed:p}");

        for ptr in [c, d, big, zeroed] {
            heap.free(Some(ptr));
        }
        dump(&heap, "everything freed");
    }
}
