use std::sync::atomic::{AtomicUsize, Ordering};

use crate::base::constants::*;
use crate::base::memory_region::MemoryRegion;

/// One bit per fixed-size page of a zone, set when the marker visits an
/// object whose header lies in that page. Sweep and scavenge scans consult
/// it to skip pages with no marked objects.
pub struct PageTable {
    base: usize,
    limit: usize,
    page_size: usize,
    bits: Vec<AtomicUsize>,
}

impl PageTable {
    pub fn new(region: MemoryRegion, page_size: usize) -> Self {
        assert!(page_size.is_power_of_two());
        let pages = (region.size() + page_size - 1) / page_size;
        let words = (pages + BITS_PER_WORD - 1) / BITS_PER_WORD;
        Self {
            base: region.start(),
            limit: region.end(),
            page_size,
            bits: (0..words).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn num_pages(&self) -> usize {
        (self.limit - self.base + self.page_size - 1) / self.page_size
    }

    pub fn page_index(&self, address: usize) -> usize {
        debug_assert!(address >= self.base && address < self.limit);
        (address - self.base) / self.page_size
    }

    pub fn mark(&self, address: usize) {
        let page = self.page_index(address);
        self.bits[page / BITS_PER_WORD].fetch_or(1 << (page % BITS_PER_WORD), Ordering::AcqRel);
    }

    pub fn is_marked(&self, address: usize) -> bool {
        let page = self.page_index(address);
        self.bits[page / BITS_PER_WORD].load(Ordering::Acquire) & (1 << (page % BITS_PER_WORD)) != 0
    }

    pub fn marked_pages(&self) -> usize {
        self.bits
            .iter()
            .map(|word| word.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    pub fn clear(&self) {
        for word in self.bits.iter() {
            word.store(0, Ordering::Release);
        }
    }
}
