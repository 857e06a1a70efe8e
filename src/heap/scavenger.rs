use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use scoped_thread_pool::Pool;

use crate::base::constants::*;
use crate::base::utils::align_up;

use super::heap::Heap;
use super::pointer::{ObjectState, Pointer};
use super::taskqueue::{Terminator, WorkQueues};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ScavengeStats {
    /// Bytes of payload copied within the young generation.
    pub copied_bytes: usize,
    /// Bytes of payload promoted into the old generation.
    pub promoted_bytes: usize,
    /// Promotions that fell back to a young copy because the old zone was
    /// full.
    pub promotion_failures: usize,
}

/// Cheney's copying collector over the young generation. One instance per
/// minor cycle; the counters are shared with the parallel workers.
///
/// Evacuation policy: an object whose remembered bit was already set when
/// the scavenge began has survived a prior cycle and is promoted into the
/// old zone; everything else is copied into to-space with the remembered
/// bit now set. Forwarding makes repeated visits idempotent.
pub struct Scavenger<'a> {
    heap: &'a Heap,
    copied: AtomicUsize,
    promoted: AtomicUsize,
    promotion_failures: AtomicUsize,
}

impl<'a> Scavenger<'a> {
    pub fn new(heap: &'a Heap) -> Self {
        Self {
            heap,
            copied: AtomicUsize::new(0),
            promoted: AtomicUsize::new(0),
            promotion_failures: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> ScavengeStats {
        ScavengeStats {
            copied_bytes: self.copied.load(Ordering::Relaxed),
            promoted_bytes: self.promoted.load(Ordering::Relaxed),
            promotion_failures: self.promotion_failures.load(Ordering::Relaxed),
        }
    }

    /// Moves one from-space object out, exactly once. Returns the new
    /// address and whether this call performed the copy (the caller then
    /// owns scheduling the copy's fields). Racing callers lose the claim
    /// and wait out the winner.
    fn evacuate(&self, target: usize) -> (usize, bool) {
        let p = unsafe { &*(target as *const Pointer) };
        if let ObjectState::Forwarded(t) = p.state() {
            return (t, false);
        }
        if !p.try_claim() {
            return (p.forwarded_target(), false);
        }

        let size = p.size();
        let mut new_address = UNALLOCATED;

        if p.is_remembered() {
            new_address = self.heap.old_zone().try_allocate(size);
            if new_address == UNALLOCATED {
                self.promotion_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    target: "gc",
                    "promotion of {} bytes failed, old zone full; object stays young",
                    size
                );
            } else {
                self.promoted.fetch_add(size, Ordering::Relaxed);
            }
        }

        if new_address == UNALLOCATED {
            let total = align_up(Pointer::SIZE + size, OBJECT_ALIGNMENT);
            new_address = self.heap.new_zone().to_space().try_allocate_raw(total);
            if new_address == UNALLOCATED {
                // To-space is as large as from-space; survivors always fit.
                panic!("gengc: to-space overflow while scavenging");
            }
            unsafe { Pointer::write_survivor(new_address, size) };
            self.copied.fetch_add(size, Ordering::Relaxed);
        }

        unsafe {
            ptr::copy_nonoverlapping(
                p.payload(),
                (*(new_address as *const Pointer)).payload(),
                size,
            );
        }
        p.forward_to(new_address);
        (new_address, true)
    }

    /// Runs the promote-or-scavenge decision over every reference field of
    /// `object`, rewriting the fields in place. Fresh copies go to
    /// `on_copy`. Old-generation objects also have their remembered bit
    /// settled here: set while any referent is young, cleared otherwise.
    fn process_fields(&self, object: usize, on_copy: &mut dyn FnMut(usize)) {
        let heap = self.heap;
        let from = heap.new_zone().from_space();
        let p = unsafe { &*(object as *const Pointer) };
        let mut has_young = false;

        for index in 0..p.num_payload_words() {
            let slot = unsafe { p.payload_word(index) };
            let mut target = unsafe { slot.read() };

            if heap.is_object(target) && from.contains(target) {
                let (moved, fresh) = self.evacuate(target);
                unsafe { slot.write(moved) };
                if fresh {
                    on_copy(moved);
                }
                target = moved;
            }

            has_young |= heap.is_object(target) && heap.new_zone().contains(target);
        }

        if p.is_old() {
            if has_young {
                p.set_remembered();
            } else {
                p.clear_remembered();
            }
        }
    }

    fn process_root_slot(&self, slot: *mut usize, on_copy: &mut dyn FnMut(usize)) {
        let target = unsafe { slot.read() };
        if self.heap.is_object(target) && self.heap.new_zone().from_space().contains(target) {
            let (moved, fresh) = self.evacuate(target);
            unsafe { slot.write(moved) };
            if fresh {
                on_copy(moved);
            }
        }
    }

    /// Old-generation objects carrying the remembered bit stand in for the
    /// old-to-young references the heap has no precise record of; they act
    /// as additional scavenge roots. Collected up front: promotion mutates
    /// the free list mid-cycle, so the walk must finish first.
    fn collect_remembered_roots(&self) -> Vec<usize> {
        let mut roots = Vec::new();
        self.heap.old_zone().for_each_object(|p| {
            let p = unsafe { &*p };
            if p.is_remembered() {
                roots.push(p.address());
            }
        });
        roots
    }

    fn finish(&self) {
        let new_zone = self.heap.new_zone();
        new_zone.seal_from_space();
        new_zone.page_table().clear();
    }

    pub fn run(&self) -> ScavengeStats {
        let heap = self.heap;
        heap.new_zone().swap_spaces();

        let remembered_roots = self.collect_remembered_roots();

        // Promoted copies queue up here; to-space copies are picked up by
        // the trailing scan pointer instead.
        let mut promoted_list = VecDeque::new();
        let mut on_copy = |copy: usize| {
            if heap.old_zone().contains(copy) {
                promoted_list.push_back(copy);
            }
        };

        heap.for_each_root_slot(|slot| self.process_root_slot(slot, &mut on_copy));
        for object in remembered_roots {
            self.process_fields(object, &mut on_copy);
        }

        // Two-pointer scan: the scan cursor trails the bump pointer until
        // both it and the promoted worklist are drained.
        let to = heap.new_zone().to_space();
        let mut scan = to.start();
        loop {
            while scan < to.top() {
                let stride = unsafe { (*(scan as *const Pointer)).heap_size() };
                self.process_fields(scan, &mut |copy| {
                    if heap.old_zone().contains(copy) {
                        promoted_list.push_back(copy);
                    }
                });
                scan += stride;
            }
            match promoted_list.pop_front() {
                Some(object) => self.process_fields(object, &mut |copy| {
                    if heap.old_zone().contains(copy) {
                        promoted_list.push_back(copy);
                    }
                }),
                None => break,
            }
        }

        self.finish();
        self.stats()
    }

    /// Parallel variant: roots and remembered objects are seeded serially,
    /// then every queue item is an evacuated object whose fields still need
    /// the promote-or-scavenge decision. The claim CAS in `evacuate` keeps
    /// relocation at-most-once across workers.
    pub fn run_parallel(&self, pool: &Pool, nworkers: usize) -> ScavengeStats {
        let heap = self.heap;
        heap.new_zone().swap_spaces();

        let remembered_roots = self.collect_remembered_roots();

        let queues = WorkQueues::new(nworkers);
        heap.for_each_root_slot(|slot| {
            self.process_root_slot(slot, &mut |copy| queues.push_global(copy))
        });
        for object in remembered_roots {
            queues.push_global(object);
        }

        let terminator = Terminator::new(nworkers);
        pool.scoped(|scope| {
            for task_id in 0..nworkers {
                let queues = &queues;
                let terminator = &terminator;
                let scavenger: &Scavenger = self;
                scope.execute(move || {
                    ScavengeTask {
                        task_id,
                        scavenger,
                        queues,
                        terminator,
                    }
                    .run()
                });
            }
        });

        self.finish();
        self.stats()
    }
}

/// One worker's share of a parallel scavenge.
pub struct ScavengeTask<'a, 'h> {
    task_id: usize,
    scavenger: &'a Scavenger<'h>,
    queues: &'a WorkQueues,
    terminator: &'a Terminator,
}

impl<'a, 'h> ScavengeTask<'a, 'h> {
    pub fn run(&self) {
        loop {
            while let Some(object) = self.queues.pop(self.task_id) {
                self.scavenger.process_fields(object, &mut |copy| {
                    self.queues.push(self.task_id, copy)
                });
            }
            if self.terminator.try_terminate(|| self.queues.has_global_work()) {
                return;
            }
        }
    }
}
