use crate::base::constants::UNALLOCATED;

pub const LOCAL_PAGE_SLOTS: usize = 512;

/// A mutator thread's root slots: a fixed-capacity, stack-like pool of
/// pointer-sized cells. A slot is claimed when a handle is taken and only
/// released by `reset` at the end of the surrounding computation. The
/// collector reads the slots during root processing and rewrites their
/// contents in place when the referent moves; the slot address itself stays
/// stable.
pub struct LocalPage {
    slots: [usize; LOCAL_PAGE_SLOTS],
    top: usize,
}

impl LocalPage {
    pub fn new() -> Self {
        Self {
            slots: [UNALLOCATED; LOCAL_PAGE_SLOTS],
            top: 0,
        }
    }

    pub const fn capacity() -> usize {
        LOCAL_PAGE_SLOTS
    }

    pub fn used_slots(&self) -> usize {
        self.top
    }

    /// Claims the next free slot and seeds it with `value`. `None` when the
    /// page is exhausted.
    pub fn handle(&mut self, value: usize) -> Option<Handle> {
        if self.top == LOCAL_PAGE_SLOTS {
            return None;
        }
        self.slots[self.top] = value;
        let handle = Handle {
            slot: &mut self.slots[self.top],
        };
        self.top += 1;
        Some(handle)
    }

    /// Releases every claimed slot (scope teardown).
    pub fn reset(&mut self) {
        for slot in &mut self.slots[..self.top] {
            *slot = UNALLOCATED;
        }
        self.top = 0;
    }

    pub(crate) fn for_each_slot<F: FnMut(*mut usize)>(&mut self, f: &mut F) {
        for slot in &mut self.slots[..self.top] {
            f(slot);
        }
    }
}

impl Default for LocalPage {
    fn default() -> Self {
        Self::new()
    }
}

/// A root reference held by the running mutator. Copyable; all copies share
/// the same underlying slot.
#[derive(Clone, Copy)]
pub struct Handle {
    slot: *mut usize,
}

impl Handle {
    pub fn slot(&self) -> *mut usize {
        self.slot
    }

    /// Current referent address. Re-read after every collection: the
    /// collector may have rewritten the slot.
    pub fn get(&self) -> usize {
        unsafe { *self.slot }
    }

    pub fn set(&self, value: usize) {
        unsafe { *self.slot = value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_claim_stable_slots() {
        let mut page = LocalPage::new();

        let a = page.handle(0x1000).unwrap();
        let b = page.handle(0x2000).unwrap();
        assert_eq!(page.used_slots(), 2);
        assert_eq!(a.get(), 0x1000);
        assert_eq!(b.get(), 0x2000);

        // Rewriting through the slot is visible through the handle.
        unsafe { *a.slot() = 0x3000 };
        assert_eq!(a.get(), 0x3000);

        page.reset();
        assert_eq!(page.used_slots(), 0);
    }

    #[test]
    fn page_capacity_is_enforced() {
        let mut page = LocalPage::new();
        for i in 0..LocalPage::capacity() {
            assert!(page.handle(i).is_some());
        }
        assert!(page.handle(0xdead).is_none());

        page.reset();
        assert!(page.handle(1).is_some());
    }
}
