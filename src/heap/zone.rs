use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::base::constants::*;
use crate::base::utils::align_up;
use crate::base::virtual_memory::{self, VirtualMemory};
#[cfg(debug_assertions)]
use crate::base::virtual_memory::Protection;

use super::free_list::{FreeList, MIN_BLOCK_SIZE};
use super::page_table::PageTable;
use super::pointer::Pointer;
use super::semispace::Semispace;

/// The young generation: one mapping split into two semispaces. New objects
/// are bump-allocated in the active ("to") space; every scavenge swaps the
/// roles. The zone is sized at startup and never grows.
pub struct NewZone {
    memory: Box<VirtualMemory>,
    spaces: [Semispace; 2],
    active: AtomicUsize,
    page_table: PageTable,
    min_allocation: usize,
    max_allocation: usize,
}

impl NewZone {
    pub fn new(total_size: usize, page_size: usize) -> Self {
        let total = align_up(total_size, 2 * virtual_memory::page_size());
        let memory = match VirtualMemory::allocate(total, "new zone") {
            Some(memory) => memory,
            None => panic!("failed to map {} bytes for the new zone", total),
        };

        let half = memory.size() / 2;
        let spaces = match (
            memory.region().subregion(0, half),
            memory.region().subregion(half, half),
        ) {
            (Some(low), Some(high)) => [Semispace::new(low), Semispace::new(high)],
            _ => unreachable!("semispaces are halves of the owned mapping"),
        };
        let page_table = PageTable::new(memory.region(), page_size);

        Self {
            spaces,
            active: AtomicUsize::new(0),
            page_table,
            min_allocation: WORD_SIZE,
            max_allocation: half - Pointer::SIZE,
            memory,
        }
    }

    pub fn semispace_size(&self) -> usize {
        self.memory.size() / 2
    }

    pub fn min_allocation(&self) -> usize {
        self.min_allocation
    }

    pub fn max_allocation(&self) -> usize {
        self.max_allocation
    }

    pub fn to_space(&self) -> &Semispace {
        &self.spaces[self.active.load(Ordering::Acquire)]
    }

    pub fn from_space(&self) -> &Semispace {
        &self.spaces[self.active.load(Ordering::Acquire) ^ 1]
    }

    /// Flips the semispace roles at the start of a scavenge. The incoming
    /// to-space must have been cleared by the previous cycle.
    pub fn swap_spaces(&self) {
        self.active.fetch_xor(1, Ordering::AcqRel);

        #[cfg(debug_assertions)]
        unsafe {
            let to = self.to_space().region();
            virtual_memory::protect_range(to.pointer(), to.size(), Protection::ReadWrite);
        }
        debug_assert_eq!(self.to_space().used(), 0);
    }

    /// Clears the outgoing from-space after a scavenge. Debug builds leave
    /// it inaccessible so stale references fault instead of resurrecting.
    pub fn seal_from_space(&self) {
        self.from_space().clear();

        #[cfg(debug_assertions)]
        unsafe {
            let from = self.from_space().region();
            virtual_memory::protect_range(from.pointer(), from.size(), Protection::NoAccess);
        }
    }

    pub fn try_allocate(&self, size: usize) -> usize {
        if size < self.min_allocation || size > self.max_allocation {
            return UNALLOCATED;
        }
        self.to_space().try_allocate(size)
    }

    pub fn contains(&self, address: usize) -> bool {
        self.memory.contains(address)
    }

    pub fn space_containing(&self, address: usize) -> Option<&Semispace> {
        self.spaces.iter().find(|space| space.contains(address))
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Walks the live (to-space) objects. Assumes the caller owns the world.
    pub fn for_each_object<F: FnMut(*mut Pointer)>(&self, mut f: F) {
        let to = self.to_space();
        let mut address = to.start();
        let top = to.top();
        while address < top {
            let p = address as *mut Pointer;
            let stride = unsafe { (*p).heap_size() };
            f(p);
            address += stride;
        }
    }

    /// Drops mark bits left behind by a full (major) mark.
    pub fn clear_marks(&self) {
        self.for_each_object(|p| unsafe { (*p).clear_marked() });
    }
}

/// The old generation: a mapping fronted by a bucketed best-fit free list,
/// shared across collector workers behind a lightweight mutex.
pub struct OldZone {
    memory: Box<VirtualMemory>,
    free_list: Mutex<FreeList>,
    page_table: PageTable,
    used: AtomicUsize,
    min_allocation: usize,
    max_allocation: usize,
}

impl OldZone {
    pub fn new(total_size: usize, page_size: usize, num_buckets: usize) -> Self {
        let total = align_up(total_size, virtual_memory::page_size());
        let memory = match VirtualMemory::allocate(total, "old zone") {
            Some(memory) => memory,
            None => panic!("failed to map {} bytes for the old zone", total),
        };

        let mut free_list = FreeList::new(num_buckets);
        let seeded = free_list.insert(memory.start(), memory.size());
        debug_assert!(seeded);

        let page_table = PageTable::new(memory.region(), page_size);

        Self {
            free_list: Mutex::new(free_list),
            page_table,
            used: AtomicUsize::new(0),
            min_allocation: WORD_SIZE,
            max_allocation: memory.size() - Pointer::SIZE,
            memory,
        }
    }

    pub fn start(&self) -> usize {
        self.memory.start()
    }

    pub fn end(&self) -> usize {
        self.memory.end()
    }

    pub fn size(&self) -> usize {
        self.memory.size()
    }

    pub fn contains(&self, address: usize) -> bool {
        self.memory.contains(address)
    }

    pub fn min_allocation(&self) -> usize {
        self.min_allocation
    }

    pub fn max_allocation(&self) -> usize {
        self.max_allocation
    }

    pub fn try_allocate(&self, size: usize) -> usize {
        if size < self.min_allocation || size > self.max_allocation {
            return UNALLOCATED;
        }

        let address = self.free_list.lock().try_allocate(size);
        if address != UNALLOCATED {
            let total = align_up(Pointer::SIZE + size, OBJECT_ALIGNMENT);
            self.used.fetch_add(total, Ordering::AcqRel);
        }
        address
    }

    pub fn free_list(&self) -> &Mutex<FreeList> {
        &self.free_list
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.free_list.lock().available()
    }

    pub(crate) fn sub_used(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Walks every live object of the zone in address order, skipping free
    /// blocks. Assumes the caller owns the world.
    pub fn for_each_object<F: FnMut(*mut Pointer)>(&self, mut f: F) {
        let mut address = self.start();
        let end = self.end();
        while address < end {
            let p = address as *mut Pointer;
            let (stride, is_free) = unsafe { ((*p).heap_size(), (*p).is_free()) };
            if !is_free {
                f(p);
            }
            address += stride;
        }
    }

    /// Resets the layout after compaction: live objects occupy
    /// `[start, live_end)`, the rest is one free block.
    pub(crate) fn rebuild_after_compact(&self, live_end: usize) {
        let mut list = self.free_list.lock();
        list.reset();
        if self.end() - live_end >= MIN_BLOCK_SIZE {
            let inserted = list.insert(live_end, self.end() - live_end);
            debug_assert!(inserted);
        }
        self.used.store(live_end - self.start(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_zone_allocates_in_active_space_only() {
        let zone = NewZone::new(256 * 1024, 4096);

        let a = zone.try_allocate(100);
        assert_ne!(a, UNALLOCATED);
        assert!(zone.to_space().contains(a));
        assert_eq!(zone.from_space().used(), 0);

        let p = unsafe { &*(a as *const Pointer) };
        assert!(p.is_new());
        assert_eq!(p.size(), 100);
    }

    #[test]
    fn new_zone_rejects_out_of_bounds_sizes() {
        let zone = NewZone::new(256 * 1024, 4096);
        assert_eq!(zone.max_allocation(), zone.semispace_size() - Pointer::SIZE);
        assert_eq!(zone.try_allocate(0), UNALLOCATED);
        assert_eq!(zone.try_allocate(WORD_SIZE - 1), UNALLOCATED);
        assert_eq!(zone.try_allocate(zone.max_allocation() + 1), UNALLOCATED);
    }

    #[test]
    fn old_zone_allocates_from_free_list() {
        let zone = OldZone::new(1024 * 1024, 4096, 128);

        let a = zone.try_allocate(1000);
        assert_ne!(a, UNALLOCATED);
        assert!(zone.contains(a));

        let p = unsafe { &*(a as *const Pointer) };
        assert!(p.is_old());
        assert_eq!(p.size(), 1000);
        assert_eq!(zone.used(), p.heap_size());
        assert_eq!(zone.available(), zone.size() - p.heap_size());
    }

    #[test]
    fn old_zone_walk_sees_live_objects_once() {
        let zone = OldZone::new(1024 * 1024, 4096, 128);
        let a = zone.try_allocate(64);
        let b = zone.try_allocate(128);

        let mut seen = Vec::new();
        zone.for_each_object(|p| seen.push(p as usize));
        assert_eq!(seen, vec![a, b]);
    }
}
