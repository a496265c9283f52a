use std::ptr::NonNull;

use osmem::{
    BlockInfo, Heap, KernelError, ReservedBreak, Status,
    config::{BLOCK_HEADER_SIZE as HEADER, INITIAL_ARENA_SIZE, MMAP_THRESHOLD, PAGE_SIZE},
    set_fatal_handler,
};

fn heap() -> Heap<ReservedBreak> {
    Heap::with_kernel(ReservedBreak::new(8 << 20).unwrap())
}

fn snapshot(heap: &Heap<ReservedBreak>) -> Vec<BlockInfo> {
    heap.blocks().collect()
}

fn info(heap: &Heap<ReservedBreak>, payload: NonNull<u8>) -> BlockInfo {
    heap.blocks()
        .find(|block| block.payload == payload)
        .expect("payload is not in the directory")
}

#[test]
fn zero_sized_requests_return_nothing() {
    let mut heap = heap();

    assert!(heap.allocate(0).is_none());
    assert!(heap.zero_allocate(0, 16).is_none());
    assert!(heap.zero_allocate(16, 0).is_none());
    assert!(heap.is_empty());
    assert!(!heap.is_preallocated());

    let a = heap.allocate(16).unwrap();
    let before = snapshot(&heap);

    assert!(heap.allocate(0).is_none());
    assert!(heap.zero_allocate(0, 0).is_none());
    assert_eq!(snapshot(&heap), before);

    unsafe { heap.free(Some(a)) };
}

#[test]
fn freed_block_is_reused() {
    let mut heap = heap();

    let a = heap.allocate(100).unwrap();
    let _guard = heap.allocate(8).unwrap();

    unsafe { heap.free(Some(a)) };

    let b = heap.allocate(104).unwrap();
    assert_eq!(a, b);

    unsafe { heap.free(Some(b)) };
    let c = heap.allocate(40).unwrap();
    assert_eq!(a, c);
}

#[test]
fn adjacent_free_blocks_merge() {
    let mut heap = heap();

    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(128).unwrap();
    let _c = heap.allocate(16).unwrap();
    let combined = info(&heap, a).footprint() + info(&heap, b).footprint();

    unsafe { heap.free(Some(a)) };
    let len = heap.len();

    unsafe { heap.free(Some(b)) };

    assert_eq!(heap.len(), len - 1);

    let merged = info(&heap, a);
    assert_eq!(merged.status, Status::Free);
    assert_eq!(merged.footprint(), combined);
}

#[test]
fn mapping_threshold_boundary() {
    let mut heap = heap();

    let arena = heap.allocate(MMAP_THRESHOLD - HEADER).unwrap();
    assert_eq!(info(&heap, arena).status, Status::Allocated);
    assert_eq!(heap.kernel().used(), INITIAL_ARENA_SIZE);

    let mapped = heap.allocate(MMAP_THRESHOLD - HEADER + 1).unwrap();
    assert_eq!(info(&heap, mapped).status, Status::Mapped);
    assert_eq!(heap.kernel().used(), INITIAL_ARENA_SIZE);

    // Same boundary once the initial region is in place.
    let extended = heap.allocate(MMAP_THRESHOLD - HEADER).unwrap();
    assert_eq!(info(&heap, extended).status, Status::Allocated);
    assert_eq!(heap.kernel().used(), 2 * INITIAL_ARENA_SIZE);

    unsafe {
        heap.free(Some(mapped));
        assert!(heap.blocks().all(|block| block.payload != mapped));

        heap.free(Some(arena));
        heap.free(Some(extended));
    }
}

#[test]
fn first_mapped_request_skips_preallocation() {
    let mut heap = heap();

    let big = heap.allocate(MMAP_THRESHOLD).unwrap();

    assert_eq!(info(&heap, big).status, Status::Mapped);
    assert!(!heap.is_preallocated());
    assert_eq!(heap.kernel().used(), 0);

    unsafe { heap.free(Some(big)) };
    assert!(heap.is_empty());
}

#[test]
fn zero_allocate_reads_back_zeroes() {
    let mut heap = heap();

    let dirty = heap.allocate(256).unwrap();
    let _guard = heap.allocate(8).unwrap();
    unsafe {
        dirty.write_bytes(0xff, 256);
        heap.free(Some(dirty));
    }

    let small = heap.zero_allocate(32, 8).unwrap();
    assert_eq!(small, dirty);
    assert_eq!(info(&heap, small).status, Status::Allocated);

    let large = heap.zero_allocate(4, 4096).unwrap();
    assert_eq!(info(&heap, large).status, Status::Mapped);

    unsafe {
        let small = std::slice::from_raw_parts(small.as_ptr(), 256);
        let large = std::slice::from_raw_parts(large.as_ptr(), 4 * 4096);

        assert!(small.iter().all(|&byte| byte == 0));
        assert!(large.iter().all(|&byte| byte == 0));
    }
}

#[test]
fn zero_allocate_page_boundary() {
    let mut heap = heap();

    let below = heap.zero_allocate(1, PAGE_SIZE - HEADER - 8).unwrap();
    assert_eq!(info(&heap, below).status, Status::Allocated);
    assert!(heap.is_preallocated());

    let at = heap.zero_allocate(1, PAGE_SIZE - HEADER).unwrap();
    assert_eq!(info(&heap, at).status, Status::Mapped);
    assert_eq!(info(&heap, at).footprint(), PAGE_SIZE);

    // The count is part of the footprint too.
    let split = heap.zero_allocate(2, (PAGE_SIZE - HEADER) / 2).unwrap();
    assert_eq!(info(&heap, split).status, Status::Mapped);
}

#[test]
fn zero_allocate_before_arena_maps() {
    let mut heap = heap();

    let zeroed = heap.zero_allocate(1, PAGE_SIZE).unwrap();

    assert_eq!(info(&heap, zeroed).status, Status::Mapped);
    assert!(!heap.is_preallocated());
    assert_eq!(heap.kernel().used(), 0);
    assert_eq!(heap.len(), 1);
}

#[test]
fn last_block_grows_in_place() {
    let mut heap = heap();

    let a = heap.allocate(INITIAL_ARENA_SIZE - HEADER).unwrap();
    assert_eq!(heap.len(), 1);

    let grown = unsafe { heap.resize(Some(a), INITIAL_ARENA_SIZE + 1000) }.unwrap();

    assert_eq!(grown, a);
    assert_eq!(heap.len(), 1);
    assert_eq!(info(&heap, a).size, INITIAL_ARENA_SIZE + 1000);
    // Only the missing bytes were taken from the break.
    assert_eq!(heap.kernel().used(), INITIAL_ARENA_SIZE + HEADER + 1000);
}

#[test]
fn blocked_block_relocates_with_contents() {
    let mut heap = heap();

    let a = heap.allocate(64).unwrap();
    let _b = heap.allocate(64).unwrap();

    unsafe {
        for i in 0..64 {
            a.add(i).write(i as u8);
        }

        let moved = heap.resize(Some(a), 512).unwrap();

        assert_ne!(moved, a);
        assert_eq!(info(&heap, a).status, Status::Free);
        assert!((0..64).all(|i| moved.add(i).read() == i as u8));

        heap.free(Some(moved));
    }
}

#[test]
fn short_merge_still_relocates() {
    let mut heap = heap();

    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(32).unwrap();
    let c = heap.allocate(8).unwrap();

    unsafe {
        a.write_bytes(0x3c, 64);
        heap.free(Some(b));

        let moved = heap.resize(Some(a), 512).unwrap();
        assert_ne!(moved, a);
        assert!((0..64).all(|i| moved.add(i).read() == 0x3c));

        // The old span of `a` and `b` is one free block right in front of `c`.
        let blocks = snapshot(&heap);
        assert_eq!(blocks[0].payload, a);
        assert_eq!(blocks[0].status, Status::Free);
        assert_eq!(blocks[0].size, 64 + HEADER + 32);
        assert_eq!(blocks[1].payload, c);
        assert_eq!(blocks[2].payload, moved);
        assert_eq!(blocks[2].size, 512);

        let total: usize = blocks.iter().map(BlockInfo::footprint).sum();
        assert_eq!(total, heap.kernel().used());
    }
}

#[test]
fn mapped_block_relocates_on_resize() {
    let mut heap = heap();

    let big = heap.allocate(200 * 1024).unwrap();

    unsafe {
        big.write_bytes(0x5a, 100);

        let small = heap.resize(Some(big), 100).unwrap();

        assert_ne!(small, big);
        assert_eq!(info(&heap, small).status, Status::Allocated);
        assert!(heap.blocks().all(|block| block.status != Status::Mapped));
        assert!((0..100).all(|i| small.add(i).read() == 0x5a));
    }
}

#[test]
fn shrinking_leaves_free_remainder() {
    let mut heap = heap();

    let a = heap.allocate(512).unwrap();
    let _guard = heap.allocate(8).unwrap();
    let len = heap.len();

    let same = unsafe { heap.resize(Some(a), 128) }.unwrap();

    assert_eq!(same, a);
    assert_eq!(heap.len(), len + 1);

    let blocks = snapshot(&heap);
    assert_eq!(blocks[0].payload, a);
    assert_eq!(blocks[0].size, 128);
    assert_eq!(blocks[1].status, Status::Free);
    assert_eq!(blocks[1].footprint(), 512 - 128);
    assert_eq!(blocks[1].payload.addr().get(), a.addr().get() + 128 + HEADER);
}

#[test]
fn shrinking_by_less_than_a_block_keeps_size() {
    let mut heap = heap();

    let a = heap.allocate(128).unwrap();
    let _guard = heap.allocate(8).unwrap();
    let before = snapshot(&heap);

    let same = unsafe { heap.resize(Some(a), 120) }.unwrap();

    assert_eq!(same, a);
    assert_eq!(snapshot(&heap), before);
}

#[test]
fn resizing_free_block_fails_without_changes() {
    let mut heap = heap();

    let a = heap.allocate(64).unwrap();
    let _b = heap.allocate(64).unwrap();

    unsafe {
        heap.free(Some(a));
        let before = snapshot(&heap);

        assert!(heap.resize(Some(a), 32).is_none());
        assert!(heap.resize(Some(a), 4096).is_none());
        assert_eq!(snapshot(&heap), before);
    }
}

#[test]
fn resize_edge_arguments() {
    let mut heap = heap();

    let a = unsafe { heap.resize(None, 48) }.unwrap();
    assert_eq!(info(&heap, a).size, 48);

    unsafe {
        assert!(heap.resize(Some(a), usize::MAX).is_none());
        assert_eq!(info(&heap, a).status, Status::Allocated);

        assert!(heap.resize(Some(a), 0).is_none());
        assert_eq!(info(&heap, a).status, Status::Free);
    }
}

#[test]
fn payloads_are_aligned() {
    let mut heap = heap();

    let ptrs: Vec<_> = (1..200).map(|size| heap.allocate(size).unwrap()).collect();

    assert!(ptrs.iter().all(|ptr| ptr.addr().get() % 8 == 0));
    assert!(heap.blocks().all(|block| block.size % 8 == 0));

    for ptr in ptrs {
        unsafe { heap.free(Some(ptr)) };
    }

    // Everything collapsed back into a single free region.
    assert_eq!(heap.len(), 1);
    assert_eq!(snapshot(&heap)[0].status, Status::Free);
}

#[test]
fn heaps_are_independent() {
    let mut first = heap();
    let mut second = heap();

    let a = first.allocate(64).unwrap();
    let b = second.allocate(64).unwrap();

    assert_ne!(a, b);
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);

    unsafe {
        first.free(Some(a));
        second.free(Some(b));
    }
}

fn panic_on_failure(err: &KernelError) -> ! {
    panic!("fatal: {err}")
}

#[test]
#[should_panic(expected = "fatal: break reservation exhausted")]
fn break_exhaustion_is_fatal() {
    set_fatal_handler(panic_on_failure);

    let mut heap = Heap::with_kernel(ReservedBreak::new(64 * 1024).unwrap());

    heap.allocate(8);
}
