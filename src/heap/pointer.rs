use std::mem::size_of;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::base::bitfield::BitField;
use crate::base::constants::*;
use crate::base::utils::align_up;

/// Generation/state flags of the header tag word, from the low bit.
pub type NewBit = BitField<1, 0>;
pub type OldBit = BitField<1, 1>;
pub type MarkedBit = BitField<1, 2>;
pub type RememberedBit = BitField<1, 3>;
pub type FreeBit = BitField<1, 4>;
/// Payload size in bytes. High bits above the size field are reserved.
pub type SizeBits = BitField<32, { FreeBit::NEXT_BIT }>;

/// Relocation state of an object. Readers match on the variant instead of
/// testing the forwarding word against zero.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectState {
    Live,
    Forwarded(usize),
}

/// Transient forwarding-word value while a parallel scavenger worker owns
/// the copy. Never a valid object address.
const CLAIMED: usize = 1;

/// The header prefixing every heap object: one tag word (generation, mark,
/// remembered, free and size bits) and one forwarding word (0 = not
/// forwarding). The bit layout is the binary contract the type layer above
/// depends on.
#[repr(C)]
pub struct Pointer {
    tag: AtomicU64,
    forwarding: AtomicUsize,
}

impl Pointer {
    pub const SIZE: usize = size_of::<Self>();
    pub const MAX_PAYLOAD: usize = u32::MAX as usize;

    pub const fn new_tag(size: usize) -> u64 {
        NewBit::encode(1) | SizeBits::encode(size as u64)
    }

    pub const fn old_tag(size: usize) -> u64 {
        OldBit::encode(1) | SizeBits::encode(size as u64)
    }

    const fn survivor_tag(size: usize) -> u64 {
        NewBit::encode(1) | RememberedBit::encode(1) | SizeBits::encode(size as u64)
    }

    const fn free_tag(block_size: usize) -> u64 {
        FreeBit::encode(1) | SizeBits::encode(block_size as u64)
    }

    unsafe fn write(addr: usize, tag: u64, forwarding: usize) -> *mut Pointer {
        let p = addr as *mut Pointer;
        p.write(Pointer {
            tag: AtomicU64::new(tag),
            forwarding: AtomicUsize::new(forwarding),
        });
        p
    }

    /// Writes a fresh young-generation header at `addr`.
    pub unsafe fn write_new(addr: usize, size: usize) -> *mut Pointer {
        Self::write(addr, Self::new_tag(size), 0)
    }

    /// Writes a fresh old-generation header at `addr`.
    pub unsafe fn write_old(addr: usize, size: usize) -> *mut Pointer {
        Self::write(addr, Self::old_tag(size), 0)
    }

    /// Header of a young object that survived the current scavenge: still
    /// new-generation, remembered, unmarked, not forwarding.
    pub unsafe fn write_survivor(addr: usize, size: usize) -> *mut Pointer {
        Self::write(addr, Self::survivor_tag(size), 0)
    }

    /// Turns `[addr, addr + block_size)` into a free block. The forwarding
    /// word doubles as the next-free link while the block is on a list.
    pub unsafe fn write_free(addr: usize, block_size: usize) -> *mut Pointer {
        Self::write(addr, Self::free_tag(block_size), UNALLOCATED)
    }

    #[inline]
    pub fn raw_tag(&self) -> u64 {
        self.tag.load(Ordering::Relaxed)
    }

    pub fn is_new(&self) -> bool {
        NewBit::decode(self.raw_tag()) != 0
    }

    pub fn is_old(&self) -> bool {
        OldBit::decode(self.raw_tag()) != 0
    }

    pub fn is_marked(&self) -> bool {
        MarkedBit::decode(self.raw_tag()) != 0
    }

    pub fn is_remembered(&self) -> bool {
        RememberedBit::decode(self.raw_tag()) != 0
    }

    pub fn is_free(&self) -> bool {
        FreeBit::decode(self.raw_tag()) != 0
    }

    /// Sets the mark bit. Returns true when this call marked the object,
    /// false when it was already marked (or a competing worker won).
    pub fn try_mark(&self) -> bool {
        debug_assert!(!self.is_free());
        let prev = self.tag.fetch_or(MarkedBit::mask_in_place(), Ordering::AcqRel);
        MarkedBit::decode(prev) == 0
    }

    pub fn clear_marked(&self) {
        self.tag
            .fetch_and(!MarkedBit::mask_in_place(), Ordering::AcqRel);
    }

    pub fn set_remembered(&self) {
        debug_assert!(!self.is_free());
        self.tag
            .fetch_or(RememberedBit::mask_in_place(), Ordering::AcqRel);
    }

    pub fn clear_remembered(&self) {
        self.tag
            .fetch_and(!RememberedBit::mask_in_place(), Ordering::AcqRel);
    }

    /// Payload size in bytes, exactly as requested at allocation. Immutable
    /// while the object is live.
    pub fn size(&self) -> usize {
        SizeBits::decode(self.raw_tag()) as usize
    }

    /// Allocation stride: header plus payload rounded to object alignment,
    /// or the whole block size for a free block. Linear walkers step by
    /// this.
    pub fn heap_size(&self) -> usize {
        let tag = self.raw_tag();
        let size = SizeBits::decode(tag) as usize;
        if FreeBit::decode(tag) != 0 {
            size
        } else {
            align_up(Self::SIZE + size, OBJECT_ALIGNMENT)
        }
    }

    pub fn state(&self) -> ObjectState {
        let target = self.forwarding.load(Ordering::Acquire);
        if target > CLAIMED {
            ObjectState::Forwarded(target)
        } else {
            ObjectState::Live
        }
    }

    /// Records the relocated address. Write-once per collection cycle.
    pub fn forward_to(&self, target: usize) {
        debug_assert!(target > CLAIMED);
        self.forwarding.store(target, Ordering::Release);
    }

    /// Claims the right to relocate this object. Exactly one scavenger
    /// worker wins; losers wait on `forwarded_target`.
    pub fn try_claim(&self) -> bool {
        self.forwarding
            .compare_exchange(0, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Busy-waits out the claim window, then returns the forwarding
    /// address. Only meaningful after a failed `try_claim`.
    pub fn forwarded_target(&self) -> usize {
        loop {
            let target = self.forwarding.load(Ordering::Acquire);
            if target > CLAIMED {
                return target;
            }
            std::hint::spin_loop();
        }
    }

    pub fn clear_forwarding(&self) {
        self.forwarding.store(0, Ordering::Release);
    }

    /// Next-free link of a block sitting on a free list.
    pub fn next_free(&self) -> usize {
        self.forwarding.load(Ordering::Relaxed)
    }

    pub fn set_next_free(&self, next: usize) {
        self.forwarding.store(next, Ordering::Relaxed);
    }

    pub fn address(&self) -> usize {
        self as *const Self as usize
    }

    pub fn payload(&self) -> *mut u8 {
        (self.address() + Self::SIZE) as *mut u8
    }

    /// Word-aligned reference slots of the payload. Trailing bytes that do
    /// not fill a word cannot hold a reference.
    pub fn num_payload_words(&self) -> usize {
        self.size() / WORD_SIZE
    }

    pub unsafe fn payload_word(&self, index: usize) -> *mut usize {
        (self.payload() as *mut usize).add(index)
    }
}
