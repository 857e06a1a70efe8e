/// A borrowed view of a contiguous byte range. Owns nothing; carving a zone
/// or semispace out of a mapping is a `subregion` call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemoryRegion {
    pointer: *mut u8,
    size: usize,
}

unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    pub const fn new(pointer: *mut u8, size: usize) -> Self {
        Self { pointer, size }
    }

    pub const fn null() -> Self {
        Self {
            pointer: core::ptr::null_mut(),
            size: 0,
        }
    }

    pub fn pointer(&self) -> *mut u8 {
        self.pointer
    }

    pub fn start(&self) -> usize {
        self.pointer as usize
    }

    pub fn end(&self) -> usize {
        self.start() + self.size
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.start() && address < self.end()
    }

    /// Bounds-checked view of `[offset, offset + size)` within this region.
    pub fn subregion(&self, offset: usize, size: usize) -> Option<MemoryRegion> {
        let end = offset.checked_add(size)?;
        if end > self.size {
            return None;
        }
        Some(MemoryRegion::new(
            (self.start() + offset) as *mut u8,
            size,
        ))
    }
}
