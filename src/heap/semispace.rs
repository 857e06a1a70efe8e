use std::sync::atomic::{AtomicUsize, Ordering};

use crate::base::constants::*;
use crate::base::memory_region::MemoryRegion;
use crate::base::utils::{align_up, is_aligned};

use super::pointer::Pointer;

/// One half of the young generation: a bump-pointer arena. Allocation is
/// monotonic within a collection cycle; `clear` resets it in O(1).
pub struct Semispace {
    region: MemoryRegion,
    top: AtomicUsize,
}

impl Semispace {
    pub fn new(region: MemoryRegion) -> Self {
        debug_assert!(is_aligned(region.start(), OBJECT_ALIGNMENT));
        debug_assert!(is_aligned(region.size(), OBJECT_ALIGNMENT));
        Self {
            top: AtomicUsize::new(region.start()),
            region,
        }
    }

    pub fn start(&self) -> usize {
        self.region.start()
    }

    pub fn end(&self) -> usize {
        self.region.end()
    }

    pub fn size(&self) -> usize {
        self.region.size()
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn top(&self) -> usize {
        self.top.load(Ordering::Acquire)
    }

    pub fn used(&self) -> usize {
        self.top() - self.start()
    }

    pub fn contains(&self, address: usize) -> bool {
        self.region.contains(address)
    }

    /// Bumps the allocation pointer by `total` bytes without writing a
    /// header. The scavenger copies whole objects into space claimed this
    /// way.
    pub fn try_allocate_raw(&self, total: usize) -> usize {
        debug_assert!(is_aligned(total, OBJECT_ALIGNMENT));
        let mut top = self.top.load(Ordering::Relaxed);
        loop {
            let new_top = top + total;
            if new_top > self.end() {
                return UNALLOCATED;
            }
            match self
                .top
                .compare_exchange_weak(top, new_top, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return top,
                Err(current) => top = current,
            }
        }
    }

    /// Allocates a young object with a `size`-byte zero-filled payload.
    /// Returns the header address, or `UNALLOCATED` when the request would
    /// pass the semispace end; the caller reacts by scavenging and retrying
    /// once.
    pub fn try_allocate(&self, size: usize) -> usize {
        let total = align_up(Pointer::SIZE + size, OBJECT_ALIGNMENT);
        let addr = self.try_allocate_raw(total);
        if addr == UNALLOCATED {
            return UNALLOCATED;
        }

        unsafe {
            std::ptr::write_bytes((addr + Pointer::SIZE) as *mut u8, 0, size);
            Pointer::write_new(addr, size);
        }
        addr
    }

    /// Resets the bump pointer. Debug builds also zero the whole region so
    /// stale objects fault loudly instead of resurrecting.
    pub fn clear(&self) {
        #[cfg(debug_assertions)]
        unsafe {
            std::ptr::write_bytes(self.region.pointer(), 0, self.region.size());
        }
        self.top.store(self.start(), Ordering::Release);
    }
}
