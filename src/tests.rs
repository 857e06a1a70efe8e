use std::ptr;

use crate::heap::heap::{Heap, HeapArguments};
use crate::heap::local::LocalPage;
use crate::heap::pointer::Pointer;
use crate::UNALLOCATED;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn header(address: usize) -> &'static Pointer {
    unsafe { &*(address as *const Pointer) }
}

fn fill_payload(address: usize, byte: u8) {
    let p = header(address);
    unsafe { ptr::write_bytes(p.payload(), byte, p.size()) };
}

fn payload_is(address: usize, byte: u8) -> bool {
    let p = header(address);
    let bytes = unsafe { std::slice::from_raw_parts(p.payload(), p.size()) };
    bytes.iter().all(|&b| b == byte)
}

#[test]
fn root_survives_two_minors_and_is_promoted() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 256 * 1024,
        old_zone_size: 1024 * 1024,
        large_object_threshold: 4096,
        parallel_workers: 1,
        ..Default::default()
    });
    let mut page = LocalPage::new();
    heap.register_local_page(&mut page);

    let r1 = heap.try_allocate_bytes(100);
    let g1 = heap.try_allocate_bytes(10);
    assert_ne!(r1, UNALLOCATED);
    assert_ne!(g1, UNALLOCATED);
    fill_payload(r1, 0x42);
    let handle = page.handle(r1).unwrap();

    // First survival: moved within the young generation, now remembered.
    assert!(heap.minor_collection());
    let moved = handle.get();
    assert_ne!(moved, r1);
    assert!(heap.new_zone().contains(moved));
    assert!(header(moved).is_new());
    assert!(header(moved).is_remembered());
    assert_eq!(header(moved).size(), 100);
    assert!(payload_is(moved, 0x42));
    assert_eq!(heap.new_zone().from_space().used(), 0);

    // Second survival with no new allocations: promoted to the old
    // generation, payload still intact.
    assert!(heap.minor_collection());
    let promoted = handle.get();
    assert!(heap.old_zone().contains(promoted));
    assert!(header(promoted).is_old());
    assert_eq!(header(promoted).size(), 100);
    assert!(payload_is(promoted, 0x42));

    // The semispace that held the garbage is active and empty again; its
    // memory is handed right back out.
    let reused = heap.try_allocate_bytes(10);
    assert_eq!(reused, r1);

    heap.unregister_local_page(&mut page);
}

#[test]
fn young_exhaustion_collects_and_allocation_proceeds() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 64 * 1024,
        old_zone_size: 1024 * 1024,
        large_object_threshold: 8 * 1024,
        parallel_workers: 1,
        ..Default::default()
    });

    // Far more garbage than one semispace holds; allocate_bytes has to
    // scavenge its way through.
    for _ in 0..256 {
        let addr = heap.allocate_bytes(1024);
        assert_ne!(addr, UNALLOCATED);
        assert!(heap.new_zone().contains(addr));
    }
    assert!(heap.collector().stats().minor_cycles > 0);
}

#[test]
fn old_exhaustion_collects_and_allocation_proceeds() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 64 * 1024,
        old_zone_size: 256 * 1024,
        large_object_threshold: 8 * 1024,
        parallel_workers: 1,
        ..Default::default()
    });

    for _ in 0..64 {
        let addr = heap.allocate_bytes(16 * 1024);
        assert_ne!(addr, UNALLOCATED);
        assert!(heap.old_zone().contains(addr));
    }
    assert!(heap.collector().stats().major_cycles > 0);
}

#[test]
#[should_panic(expected = "out of memory")]
fn exhaustion_with_live_roots_is_fatal_after_one_retry() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 64 * 1024,
        old_zone_size: 256 * 1024,
        large_object_threshold: 8 * 1024,
        parallel_workers: 1,
        ..Default::default()
    });
    let mut page = LocalPage::new();
    heap.register_local_page(&mut page);

    // Pin the whole old zone with rooted objects so the major collection
    // triggered by the next request has nothing to reclaim.
    loop {
        let addr = heap.try_allocate_bytes(16 * 1024);
        if addr == UNALLOCATED {
            break;
        }
        page.handle(addr).unwrap();
    }

    // One collection, one retry, then fatal.
    heap.allocate_bytes(16 * 1024);
}

#[test]
fn linked_structure_survives_minor_then_major() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 256 * 1024,
        old_zone_size: 1024 * 1024,
        large_object_threshold: 4096,
        parallel_workers: 1,
        ..Default::default()
    });
    let mut page = LocalPage::new();
    heap.register_local_page(&mut page);

    // A young list head referencing an old payload object.
    let head = heap.try_allocate_bytes(64);
    let next = heap.try_allocate_bytes(64);
    let blob = heap.try_allocate_bytes(4096);
    fill_payload(blob, 0x7E);
    unsafe {
        header(head).payload_word(0).write(next);
        header(next).payload_word(0).write(blob);
    }
    let handle = page.handle(head).unwrap();
    let _garbage_blob = heap.try_allocate_bytes(4096);

    assert!(heap.minor_collection());
    assert!(heap.major_collection());

    let head2 = handle.get();
    let next2 = unsafe { header(head2).payload_word(0).read() };
    let blob2 = unsafe { header(next2).payload_word(0).read() };
    assert!(heap.new_zone().contains(head2));
    assert!(heap.new_zone().contains(next2));
    assert!(heap.old_zone().contains(blob2));
    assert_eq!(header(blob2).size(), 4096);
    assert!(payload_is(blob2, 0x7E));

    heap.unregister_local_page(&mut page);
}

#[test]
fn parallel_collector_preserves_the_object_graph() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 512 * 1024,
        old_zone_size: 2 * 1024 * 1024,
        large_object_threshold: 4096,
        parallel_workers: 4,
        ..Default::default()
    });
    let mut page = LocalPage::new();
    heap.register_local_page(&mut page);

    let mut handles = Vec::new();
    for i in 0..64u8 {
        let addr = heap.try_allocate_bytes(256);
        fill_payload(addr, i);
        handles.push((page.handle(addr).unwrap(), i));
    }

    assert!(heap.minor_collection());
    assert!(heap.minor_collection()); // everything promoted now
    assert!(heap.major_collection());

    for (handle, byte) in &handles {
        let addr = handle.get();
        assert!(heap.old_zone().contains(addr));
        assert_eq!(header(addr).size(), 256);
        assert!(payload_is(addr, *byte));
    }

    heap.unregister_local_page(&mut page);
}

#[test]
fn compacting_major_leaves_a_contiguous_old_zone() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 256 * 1024,
        old_zone_size: 1024 * 1024,
        large_object_threshold: 4096,
        parallel_workers: 1,
        compact_old_zone: true,
        ..Default::default()
    });
    let mut page = LocalPage::new();
    heap.register_local_page(&mut page);

    // Interleave survivors and garbage so sweeping would fragment.
    let mut survivors = Vec::new();
    for i in 0..8 {
        let keep = heap.try_allocate_bytes(4096);
        let _garbage = heap.try_allocate_bytes(4096);
        fill_payload(keep, i as u8 + 1);
        survivors.push((page.handle(keep).unwrap(), i as u8 + 1));
    }

    assert!(heap.major_collection());

    // Survivors are packed from the zone start in allocation order.
    let mut expected = heap.old_zone().start();
    for (handle, byte) in &survivors {
        let addr = handle.get();
        assert_eq!(addr, expected);
        assert!(payload_is(addr, *byte));
        expected += header(addr).heap_size();
    }
    assert_eq!(heap.old_zone().used(), expected - heap.old_zone().start());
    assert_eq!(
        heap.old_zone().available(),
        heap.old_zone().size() - heap.old_zone().used()
    );

    heap.unregister_local_page(&mut page);
}

#[test]
fn unrooted_objects_are_not_resolvable_after_collection() {
    init_logging();
    let heap = Heap::new(HeapArguments {
        new_zone_size: 256 * 1024,
        old_zone_size: 1024 * 1024,
        large_object_threshold: 4096,
        parallel_workers: 1,
        ..Default::default()
    });
    let mut page = LocalPage::new();
    heap.register_local_page(&mut page);

    let root = heap.try_allocate_bytes(64);
    let garbage = heap.try_allocate_bytes(64);
    page.handle(root).unwrap();

    assert!(heap.minor_collection());

    // Only the root survived into to-space.
    let to = heap.new_zone().to_space();
    assert_eq!(to.used(), header(to.start()).heap_size());
    // The garbage address now lies in the (empty) from-space.
    assert!(heap.new_zone().from_space().contains(garbage));
    assert_eq!(heap.new_zone().from_space().used(), 0);

    heap.unregister_local_page(&mut page);
}
