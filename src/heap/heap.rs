use core::fmt;

use parking_lot::Mutex;

use crate::base::constants::*;
use crate::base::utils::align_up;

use super::collector::Collector;
use super::local::LocalPage;
use super::pointer::{FreeBit, NewBit, OldBit, Pointer, SizeBits};
use super::zone::{NewZone, OldZone};

/// Sizing supplied by the type layer for `try_allocate_class_bytes`.
pub trait Class {
    fn allocation_size(&self) -> usize;
}

/// The configuration surface. Read once at heap construction; nothing is
/// mutable afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapArguments {
    /// Total young-generation mapping (both semispaces).
    pub new_zone_size: usize,
    pub new_page_size: usize,
    pub old_zone_size: usize,
    pub old_page_size: usize,
    pub free_list_buckets: usize,
    /// Payload size at or above which an allocation bypasses the young
    /// generation and goes straight to the old zone's free list.
    pub large_object_threshold: usize,
    /// Collector worker count; 0 means one per CPU.
    pub parallel_workers: usize,
    /// Major collections compact instead of sweeping.
    pub compact_old_zone: bool,
}

impl Default for HeapArguments {
    fn default() -> Self {
        Self {
            new_zone_size: 4 * 1024 * 1024,
            new_page_size: 4096,
            old_zone_size: 16 * 1024 * 1024,
            old_page_size: 4096,
            free_list_buckets: 128,
            large_object_threshold: 64 * 1024,
            parallel_workers: 0,
            compact_old_zone: false,
        }
    }
}

/// Validated, derived configuration stored in the heap.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapOptions {
    pub new_zone_size: usize,
    pub new_page_size: usize,
    pub old_zone_size: usize,
    pub old_page_size: usize,
    pub free_list_buckets: usize,
    pub large_object_threshold: usize,
    pub parallel_workers: usize,
    pub compact_old_zone: bool,
}

impl HeapOptions {
    fn setup(args: &HeapArguments) -> Self {
        assert!(args.new_page_size.is_power_of_two());
        assert!(args.old_page_size.is_power_of_two());
        assert!(args.free_list_buckets >= 2);
        assert!(args.large_object_threshold >= WORD_SIZE);

        let workers = if args.parallel_workers == 0 {
            num_cpus::get()
        } else {
            args.parallel_workers
        };

        let opts = Self {
            new_zone_size: align_up(args.new_zone_size, OBJECT_ALIGNMENT),
            new_page_size: args.new_page_size,
            old_zone_size: align_up(args.old_zone_size, OBJECT_ALIGNMENT),
            old_page_size: args.old_page_size,
            free_list_buckets: args.free_list_buckets,
            large_object_threshold: args.large_object_threshold,
            parallel_workers: workers,
            compact_old_zone: args.compact_old_zone,
        };
        assert!(
            opts.large_object_threshold <= opts.new_zone_size / 2,
            "large-object threshold must fit in a semispace"
        );
        opts
    }
}

impl fmt::Display for HeapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapOptions")
            .field("new_zone_size", &self.new_zone_size)
            .field("new_page_size", &self.new_page_size)
            .field("old_zone_size", &self.old_zone_size)
            .field("old_page_size", &self.old_page_size)
            .field("free_list_buckets", &self.free_list_buckets)
            .field("large_object_threshold", &self.large_object_threshold)
            .field("parallel_workers", &self.parallel_workers)
            .field("compact_old_zone", &self.compact_old_zone)
            .finish()
    }
}

/// One heap per runtime: a young zone, an old zone, the registered root
/// pages and the collector that owns the phase state. Mutator allocation is
/// single-threaded per heap; the collector's workers share the heap only
/// within a stop-the-world phase.
pub struct Heap {
    opts: HeapOptions,
    new_zone: NewZone,
    old_zone: OldZone,
    local_pages: Mutex<Vec<*mut LocalPage>>,
    collector: Collector,
}

unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub fn new(args: HeapArguments) -> Box<Self> {
        let opts = HeapOptions::setup(&args);

        let new_zone = NewZone::new(opts.new_zone_size, opts.new_page_size);
        let old_zone = OldZone::new(opts.old_zone_size, opts.old_page_size, opts.free_list_buckets);
        let collector = Collector::new(&opts);

        log::info!(
            target: "gc",
            "Heap initialized: new 0x{:x}..0x{:x}, old 0x{:x}..0x{:x}, {}",
            new_zone.to_space().start(),
            new_zone.from_space().end().max(new_zone.to_space().end()),
            old_zone.start(),
            old_zone.end(),
            opts,
        );

        Box::new(Self {
            opts,
            new_zone,
            old_zone,
            local_pages: Mutex::new(Vec::new()),
            collector,
        })
    }

    pub fn options(&self) -> &HeapOptions {
        &self.opts
    }

    pub fn new_zone(&self) -> &NewZone {
        &self.new_zone
    }

    pub fn old_zone(&self) -> &OldZone {
        &self.old_zone
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Routes by size: large objects go straight to the old generation,
    /// everything else is bump-allocated in the young one. Returns the
    /// header address or `UNALLOCATED`.
    pub fn try_allocate_bytes(&self, size: usize) -> usize {
        if size == 0 {
            return UNALLOCATED;
        }
        if size >= self.opts.large_object_threshold {
            self.old_zone.try_allocate(size)
        } else {
            self.new_zone.try_allocate(size)
        }
    }

    pub fn try_allocate_class_bytes(&self, class: &dyn Class) -> usize {
        self.try_allocate_bytes(class.allocation_size())
    }

    /// `try_allocate_bytes` plus the recovery envelope: one collection of
    /// the exhausted generation, one retry, then the condition is fatal.
    /// There is no heap growth or paging fallback.
    pub fn allocate_bytes(&self, size: usize) -> usize {
        let address = self.try_allocate_bytes(size);
        if address != UNALLOCATED {
            return address;
        }

        if size >= self.opts.large_object_threshold {
            self.major_collection();
        } else {
            self.minor_collection();
        }

        let address = self.try_allocate_bytes(size);
        if address != UNALLOCATED {
            return address;
        }

        log::error!(
            target: "gc",
            "out of memory: {} bytes not available after collection (new used {}, old used {})",
            size,
            self.new_zone.to_space().used(),
            self.old_zone.used(),
        );
        panic!("gengc: out of memory allocating {} bytes", size);
    }

    pub fn minor_collection(&self) -> bool {
        self.collector.collect_minor(self)
    }

    pub fn major_collection(&self) -> bool {
        self.collector.collect_major(self)
    }

    pub fn contains(&self, address: usize) -> bool {
        self.new_zone.contains(address) || self.old_zone.contains(address)
    }

    /// Registers a mutator thread's root page. The page must stay valid
    /// until `unregister_local_page`.
    pub fn register_local_page(&self, page: *mut LocalPage) {
        let mut pages = self.local_pages.lock();
        debug_assert!(!pages.contains(&page));
        pages.push(page);
    }

    pub fn unregister_local_page(&self, page: *mut LocalPage) {
        self.local_pages.lock().retain(|&p| p != page);
    }

    /// Applies `f` to every claimed root slot of every registered page.
    /// Only the collector calls this, during a stop-the-world phase.
    pub(crate) fn for_each_root_slot<F: FnMut(*mut usize)>(&self, mut f: F) {
        let pages = self.local_pages.lock();
        for &page in pages.iter() {
            unsafe { (*page).for_each_slot(&mut f) };
        }
    }

    /// The validation gate the tracers run payload words through. A word is
    /// treated as a reference only if it is a plausible header address: in
    /// a zone, object-aligned, carrying exactly one generation bit that
    /// agrees with the zone, not free, and sized within the zone. Reference
    /// fields hold addresses handed out by this allocator (or
    /// `UNALLOCATED`), so for those the gate is exact.
    pub fn is_object(&self, address: usize) -> bool {
        if address == UNALLOCATED || address & OBJECT_ALIGNMENT_MASK != 0 {
            return false;
        }

        let zone_end = if self.new_zone.contains(address) {
            match self.new_zone.space_containing(address) {
                Some(space) => space.end(),
                None => return false,
            }
        } else if self.old_zone.contains(address) {
            self.old_zone.end()
        } else {
            return false;
        };

        if address + Pointer::SIZE > zone_end {
            return false;
        }

        let tag = unsafe { (*(address as *const Pointer)).raw_tag() };
        if FreeBit::decode(tag) != 0 {
            return false;
        }

        let is_new = NewBit::decode(tag) != 0;
        let is_old = OldBit::decode(tag) != 0;
        if is_new == is_old || is_new != self.new_zone.contains(address) {
            return false;
        }

        let size = SizeBits::decode(tag) as usize;
        if size < WORD_SIZE {
            return false;
        }
        address + align_up(Pointer::SIZE + size, OBJECT_ALIGNMENT) <= zone_end
    }
}
