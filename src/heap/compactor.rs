use std::ptr;

use super::heap::Heap;
use super::pointer::{ObjectState, Pointer};

/// Mark-compact reclamation of the old generation, as the configured
/// alternative to sweeping. Three passes over the zone, serial:
///
/// 1. compute forwarding addresses by packing marked objects toward the
///    zone start, in address order;
/// 2. rewrite every root slot and every reference field in both
///    generations through the forwarding addresses, while the original
///    headers are still in place;
/// 3. slide each marked object down to its destination, clearing its mark
///    and forwarding on the way, then rebuild the free list as one tail
///    block.
///
/// Unmarked objects are discarded by being slid over. Address order plus
/// dst <= src makes the overlapping moves safe.
pub struct Compactor<'a> {
    heap: &'a Heap,
}

impl<'a> Compactor<'a> {
    pub fn new(heap: &'a Heap) -> Self {
        Self { heap }
    }

    fn update_slot(heap: &Heap, slot: *mut usize) {
        let target = unsafe { slot.read() };
        if !heap.is_object(target) || !heap.old_zone().contains(target) {
            return;
        }
        let p = unsafe { &*(target as *const Pointer) };
        if let ObjectState::Forwarded(to) = p.state() {
            unsafe { slot.write(to) };
        }
    }

    fn update_fields(heap: &Heap, object: *mut Pointer) {
        let p = unsafe { &*object };
        for index in 0..p.num_payload_words() {
            Self::update_slot(heap, unsafe { p.payload_word(index) });
        }
    }

    /// Returns the bytes reclaimed from dead objects.
    pub fn run(&self) -> usize {
        let heap = self.heap;
        let old = heap.old_zone();
        let used_before = old.used();

        // Pass 1: plan the packed layout.
        let mut cursor = old.start();
        old.for_each_object(|object| {
            let p = unsafe { &*object };
            if p.is_marked() {
                p.forward_to(cursor);
                cursor += p.heap_size();
            }
        });
        let live_end = cursor;

        // Pass 2: redirect references while the old headers still exist.
        heap.for_each_root_slot(|slot| Self::update_slot(heap, slot));
        heap.new_zone()
            .for_each_object(|object| Self::update_fields(heap, object));
        old.for_each_object(|object| {
            if unsafe { &*object }.is_marked() {
                Self::update_fields(heap, object);
            }
        });

        // Pass 3: slide. Walking ascending addresses guarantees a source is
        // never overwritten before it is copied.
        let mut address = old.start();
        let end = old.end();
        while address < end {
            let p = unsafe { &*(address as *const Pointer) };
            let stride = p.heap_size();
            if !p.is_free() && p.is_marked() {
                let target = match p.state() {
                    ObjectState::Forwarded(to) => to,
                    ObjectState::Live => unreachable!("marked object without a forwarding address"),
                };
                p.clear_marked();
                p.clear_forwarding();
                unsafe { ptr::copy(address as *const u8, target as *mut u8, stride) };
            }
            address += stride;
        }

        #[cfg(debug_assertions)]
        unsafe {
            ptr::write_bytes(live_end as *mut u8, 0, end - live_end);
        }

        old.rebuild_after_compact(live_end);
        old.page_table().clear();

        used_before - (live_end - old.start())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::heap::HeapArguments;
    use crate::heap::local::LocalPage;

    fn test_heap() -> Box<Heap> {
        Heap::new(HeapArguments {
            new_zone_size: 256 * 1024,
            old_zone_size: 1024 * 1024,
            large_object_threshold: 4096,
            parallel_workers: 1,
            compact_old_zone: true,
            ..Default::default()
        })
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
    fn survivors_are_packed_toward_the_start() {
        let heap = test_heap();
        let mut page = LocalPage::new();
        heap.register_local_page(&mut page);

        let _a = heap.try_allocate_bytes(4096);
        let b = heap.try_allocate_bytes(4096);
        let _c = heap.try_allocate_bytes(4096);
        let d = heap.try_allocate_bytes(4096);
        fill_payload(b, 0xB0);
        fill_payload(d, 0xD0);
        let hb = page.handle(b).unwrap();
        let hd = page.handle(d).unwrap();

        assert!(header(b).try_mark());
        assert!(header(d).try_mark());

        let reclaimed = Compactor::new(&heap).run();
        assert_eq!(reclaimed, 2 * header(hb.get()).heap_size());

        let b2 = hb.get();
        let d2 = hd.get();
        assert_eq!(b2, heap.old_zone().start());
        assert_eq!(d2, b2 + header(b2).heap_size());
        assert!(header(b2).is_old() && !header(b2).is_marked());
        assert_eq!(header(b2).size(), 4096);
        assert!(payload_is(b2, 0xB0));
        assert!(payload_is(d2, 0xD0));

        // The rest of the zone is one contiguous free block.
        let live = header(b2).heap_size() + header(d2).heap_size();
        assert_eq!(heap.old_zone().used(), live);
        assert_eq!(heap.old_zone().available(), heap.old_zone().size() - live);
        assert_eq!(heap.try_allocate_bytes(4096), d2 + header(d2).heap_size());

        heap.unregister_local_page(&mut page);
    }

    #[test]
    fn references_follow_the_moved_objects() {
        let heap = test_heap();
        let mut page = LocalPage::new();
        heap.register_local_page(&mut page);

        let _gap = heap.try_allocate_bytes(4096);
        let x = heap.try_allocate_bytes(4096);
        let y = heap.try_allocate_bytes(4096);
        let young = heap.try_allocate_bytes(64);

        unsafe {
            header(x).payload_word(0).write(y);
            header(young).payload_word(0).write(y);
        }
        let hx = page.handle(x).unwrap();
        let hyoung = page.handle(young).unwrap();

        assert!(header(x).try_mark());
        assert!(header(y).try_mark());

        Compactor::new(&heap).run();

        let x2 = hx.get();
        let y2 = unsafe { header(x2).payload_word(0).read() };
        assert_ne!(y2, y);
        assert!(header(y2).is_old());
        assert_eq!(header(y2).size(), 4096);

        // The young object's field was redirected too; the young object
        // itself did not move.
        assert_eq!(hyoung.get(), young);
        assert_eq!(unsafe { header(young).payload_word(0).read() }, y2);

        heap.unregister_local_page(&mut page);
    }

    #[test]
    fn objects_already_in_place_stay_put() {
        let heap = test_heap();
        let mut page = LocalPage::new();
        heap.register_local_page(&mut page);

        let a = heap.try_allocate_bytes(4096);
        fill_payload(a, 0xA1);
        let ha = page.handle(a).unwrap();
        assert!(header(a).try_mark());

        Compactor::new(&heap).run();

        assert_eq!(ha.get(), a);
        assert!(payload_is(a, 0xA1));
        assert!(!header(a).is_marked());
        assert_eq!(header(a).state(), ObjectState::Live);

        heap.unregister_local_page(&mut page);
    }
}
