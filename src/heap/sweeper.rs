use std::sync::atomic::{AtomicUsize, Ordering};

use scoped_thread_pool::Pool;

use crate::base::constants::*;

use super::heap::Heap;
use super::pointer::Pointer;

/// Mark-sweep reclamation of the old generation. Runs only after a full
/// mark; assumes it owns the world.
///
/// The walk accumulates maximal garbage runs: dead objects extend the
/// current run, stale free blocks are unlinked and absorbed, a marked
/// object flushes the run into the free list and drops its mark bit. A page
/// whose page-table bit is clear cannot hold a marked object, which skips
/// the per-object mark test across fully dead pages.
pub struct Sweeper<'a> {
    heap: &'a Heap,
}

struct Run {
    start: usize,
    size: usize,
}

impl Run {
    fn new() -> Self {
        Self {
            start: UNALLOCATED,
            size: 0,
        }
    }

    fn extend(&mut self, address: usize, stride: usize) {
        if self.start == UNALLOCATED {
            self.start = address;
        }
        self.size += stride;
    }

    fn take(&mut self) -> Option<(usize, usize)> {
        if self.start == UNALLOCATED {
            return None;
        }
        let run = (self.start, self.size);
        self.start = UNALLOCATED;
        self.size = 0;
        Some(run)
    }
}

impl<'a> Sweeper<'a> {
    pub fn new(heap: &'a Heap) -> Self {
        Self { heap }
    }

    /// Walks the zone once, collecting the maximal garbage runs. The
    /// free-list lock is held for the whole walk (stale blocks are unlinked
    /// as they are absorbed) and released before any run is reinserted.
    /// Returns the runs and the bytes of dead objects (absorbed free blocks
    /// were never counted as used).
    fn walk(&self) -> (Vec<(usize, usize)>, usize) {
        let old = self.heap.old_zone();
        let page_table = old.page_table();
        let mut list = old.free_list().lock();

        let mut runs = Vec::new();
        let mut run = Run::new();
        let mut reclaimed = 0usize;
        let mut address = old.start();
        let end = old.end();

        while address < end {
            let p = unsafe { &*(address as *const Pointer) };
            let stride = p.heap_size();

            if p.is_free() {
                let removed = list.remove(address, stride);
                debug_assert!(removed);
                run.extend(address, stride);
            } else if page_table.is_marked(address) && p.is_marked() {
                p.clear_marked();
                runs.extend(run.take());
            } else {
                reclaimed += stride;
                run.extend(address, stride);
            }

            address += stride;
        }
        runs.extend(run.take());
        drop(list);

        old.sub_used(reclaimed);
        page_table.clear();
        (runs, reclaimed)
    }

    fn insert_run(&self, start: usize, size: usize) {
        #[cfg(debug_assertions)]
        unsafe {
            std::ptr::write_bytes(start as *mut u8, 0, size);
        }
        let inserted = self.heap.old_zone().free_list().lock().insert(start, size);
        debug_assert!(inserted);
    }

    pub fn run(&self) -> usize {
        let (runs, reclaimed) = self.walk();
        for (start, size) in runs {
            self.insert_run(start, size);
        }
        reclaimed
    }

    /// Parallel variant: the walk stays serial (it needs the object order),
    /// but zeroing and free-list insertion of the collected runs is
    /// distributed over the pool. Runs are separated by marked objects, so
    /// no two inserts coalesce with each other and insertion order does not
    /// matter.
    pub fn run_parallel(&self, pool: &Pool, nworkers: usize) -> usize {
        let (runs, reclaimed) = self.walk();

        let next = AtomicUsize::new(0);
        pool.scoped(|scope| {
            for _ in 0..nworkers {
                let runs = &runs;
                let next = &next;
                let sweeper: &Sweeper = self;
                scope.execute(move || loop {
                    let index = next.fetch_add(1, Ordering::AcqRel);
                    if index >= runs.len() {
                        break;
                    }
                    let (start, size) = runs[index];
                    sweeper.insert_run(start, size);
                });
            }
        });

        reclaimed
    }
}
