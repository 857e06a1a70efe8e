use crate::base::constants::*;
use crate::base::utils::{align_up, is_aligned};

use super::pointer::Pointer;

/// Smallest region the list will track: enough for a free-block header
/// (tag word + next link).
pub const MIN_BLOCK_SIZE: usize = Pointer::SIZE;

/// Best-fit free-block index over the old generation. Blocks are bucketed
/// by size class; each bucket is an address-ordered intrusive list threaded
/// through the blocks' forwarding words. The last bucket collects every
/// block too large for a dedicated class.
///
/// Invariant: blocks never overlap, and together with live objects they
/// cover every address of the zone.
pub struct FreeList {
    buckets: Vec<usize>,
    free_bytes: usize,
}

impl FreeList {
    pub fn new(num_buckets: usize) -> Self {
        Self {
            buckets: vec![UNALLOCATED; num_buckets.max(2)],
            free_bytes: 0,
        }
    }

    fn bucket_for(&self, block_size: usize) -> usize {
        (block_size >> OBJECT_ALIGNMENT_LOG2).min(self.buckets.len() - 1)
    }

    /// Total free bytes currently on the list.
    pub fn available(&self) -> usize {
        self.free_bytes
    }

    fn link(&mut self, start: usize, block_size: usize) {
        unsafe {
            Pointer::write_free(start, block_size);

            let index = self.bucket_for(block_size);
            let mut prev = UNALLOCATED;
            let mut current = self.buckets[index];
            while current != UNALLOCATED && current < start {
                prev = current;
                current = (*(current as *const Pointer)).next_free();
            }

            (*(start as *const Pointer)).set_next_free(current);
            if prev == UNALLOCATED {
                self.buckets[index] = start;
            } else {
                (*(prev as *const Pointer)).set_next_free(start);
            }
        }
        self.free_bytes += block_size;
    }

    fn unlink(&mut self, start: usize, block_size: usize) -> bool {
        let index = self.bucket_for(block_size);
        let mut prev = UNALLOCATED;
        let mut current = self.buckets[index];
        unsafe {
            while current != UNALLOCATED && current <= start {
                let block = &*(current as *const Pointer);
                if current == start {
                    if block.heap_size() != block_size {
                        return false;
                    }
                    let next = block.next_free();
                    if prev == UNALLOCATED {
                        self.buckets[index] = next;
                    } else {
                        (*(prev as *const Pointer)).set_next_free(next);
                    }
                    self.free_bytes -= block_size;
                    return true;
                }
                prev = current;
                current = block.next_free();
            }
        }
        false
    }

    fn find_block_ending_at(&self, end: usize) -> Option<(usize, usize)> {
        self.find_block(|start, size| start + size == end)
    }

    fn find_block_starting_at(&self, addr: usize) -> Option<(usize, usize)> {
        self.find_block(|start, _| start == addr)
    }

    fn find_block(&self, pred: impl Fn(usize, usize) -> bool) -> Option<(usize, usize)> {
        for &head in self.buckets.iter() {
            let mut current = head;
            while current != UNALLOCATED {
                let block = unsafe { &*(current as *const Pointer) };
                let size = block.heap_size();
                if pred(current, size) {
                    return Some((current, size));
                }
                current = block.next_free();
            }
        }
        None
    }

    /// Adds `[start, start + size)` to the list, merging with an adjacent
    /// free block on either side. Rejects undersized or misaligned regions.
    pub fn insert(&mut self, start: usize, size: usize) -> bool {
        if size < MIN_BLOCK_SIZE
            || !is_aligned(start, OBJECT_ALIGNMENT)
            || !is_aligned(size, OBJECT_ALIGNMENT)
        {
            return false;
        }

        let mut start = start;
        let mut size = size;

        if let Some((left, left_size)) = self.find_block_ending_at(start) {
            self.unlink(left, left_size);
            start = left;
            size += left_size;
        }
        if let Some((right, right_size)) = self.find_block_starting_at(start + size) {
            self.unlink(right, right_size);
            size += right_size;
        }

        self.link(start, size);
        true
    }

    /// Unlinks exactly the block `[start, start + size)`. Fails if the list
    /// does not own that block.
    pub fn remove(&mut self, start: usize, size: usize) -> bool {
        if size < MIN_BLOCK_SIZE || !is_aligned(start, OBJECT_ALIGNMENT) {
            return false;
        }
        self.unlink(start, size)
    }

    /// Smallest block that satisfies `block_size` with either an exact
    /// match or enough slack for a remainder of at least the minimum block
    /// size. Ties break toward the lowest address.
    pub fn find_best_fit(&self, block_size: usize) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;

        for index in self.bucket_for(block_size)..self.buckets.len() {
            let mut current = self.buckets[index];
            while current != UNALLOCATED {
                let block = unsafe { &*(current as *const Pointer) };
                let size = block.heap_size();
                if size == block_size || size >= block_size + MIN_BLOCK_SIZE {
                    let better = match best {
                        None => true,
                        Some((best_addr, best_size)) => {
                            size < best_size || (size == best_size && current < best_addr)
                        }
                    };
                    if better {
                        best = Some((current, size));
                    }
                }
                current = block.next_free();
            }

            // Buckets are scanned in ascending size-class order, so an exact
            // fit cannot be beaten by a later bucket.
            if let Some((_, size)) = best {
                if size == block_size {
                    break;
                }
            }
        }

        best
    }

    /// Carves an old-generation object with a `size`-byte zero-filled
    /// payload out of the best-fitting block. Returns the header address or
    /// `UNALLOCATED`; the caller reacts to failure by running a major
    /// collection and retrying once.
    pub fn try_allocate(&mut self, size: usize) -> usize {
        let total = align_up(Pointer::SIZE + size, OBJECT_ALIGNMENT);
        let (start, block_size) = match self.find_best_fit(total) {
            Some(hit) => hit,
            None => return UNALLOCATED,
        };

        let removed = self.unlink(start, block_size);
        debug_assert!(removed);

        if block_size > total {
            self.link(start + total, block_size - total);
        }

        unsafe {
            std::ptr::write_bytes((start + Pointer::SIZE) as *mut u8, 0, size);
            Pointer::write_old(start, size);
        }
        start
    }

    /// Drops every block. Used when the compactor rebuilds the zone layout.
    pub fn reset(&mut self) {
        for head in self.buckets.iter_mut() {
            *head = UNALLOCATED;
        }
        self.free_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::virtual_memory::VirtualMemory;

    fn backing() -> (Box<VirtualMemory>, usize) {
        let vm = VirtualMemory::allocate(64 * 1024, "free list test").unwrap();
        let base = vm.start();
        (vm, base)
    }

    #[test]
    fn insert_then_find_round_trips() {
        let (_vm, base) = backing();
        let mut list = FreeList::new(128);

        assert!(list.insert(base, 64));
        assert_eq!(list.find_best_fit(64), Some((base, 64)));
        assert_eq!(list.available(), 64);
    }

    #[test]
    fn adjacent_blocks_coalesce() {
        let (_vm, base) = backing();
        let mut list = FreeList::new(128);

        assert!(list.insert(base, 16));
        assert!(list.insert(base + 16, 16));
        assert_eq!(list.find_best_fit(32), Some((base, 32)));
        assert_eq!(list.available(), 32);

        // A middle insert merges both neighbours into one block.
        assert!(list.insert(base + 64, 16));
        assert!(list.insert(base + 96, 16));
        assert!(list.insert(base + 80, 16));
        assert_eq!(list.find_best_fit(48), Some((base + 64, 48)));
    }

    #[test]
    fn best_fit_prefers_exact_then_lowest_address() {
        let (_vm, base) = backing();
        let mut list = FreeList::new(128);

        assert!(list.insert(base + 1024, 64));
        assert!(list.insert(base, 64));
        // Two 64-byte blocks: the lower address wins.
        assert_eq!(list.find_best_fit(64), Some((base, 64)));

        // An exact 32-byte block beats splitting a 64-byte one.
        assert!(list.insert(base + 2048, 32));
        assert_eq!(list.find_best_fit(32), Some((base + 2048, 32)));
    }

    #[test]
    fn remove_requires_ownership() {
        let (_vm, base) = backing();
        let mut list = FreeList::new(128);

        assert!(!list.remove(base, 64));
        assert!(list.insert(base, 64));
        assert!(!list.remove(base + 16, 48));
        assert!(list.remove(base, 64));
        assert_eq!(list.available(), 0);
        assert_eq!(list.find_best_fit(16), None);
    }

    #[test]
    fn undersized_or_misaligned_regions_are_rejected() {
        let (_vm, base) = backing();
        let mut list = FreeList::new(128);

        assert!(!list.insert(base, 8));
        assert!(!list.insert(base + 4, 32));
        assert!(!list.insert(base, 24));
    }

    #[test]
    fn allocate_splits_and_reinserts_remainder() {
        let (_vm, base) = backing();
        let mut list = FreeList::new(128);
        assert!(list.insert(base, 4096));

        let addr = list.try_allocate(100);
        assert_eq!(addr, base);

        let p = unsafe { &*(addr as *const Pointer) };
        assert!(p.is_old() && !p.is_free());
        assert_eq!(p.size(), 100);
        assert_eq!(list.available(), 4096 - p.heap_size());

        assert_eq!(list.try_allocate(8192), UNALLOCATED);
    }
}
