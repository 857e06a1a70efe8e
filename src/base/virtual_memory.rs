use once_cell::sync::Lazy;

use super::{memory_region::MemoryRegion, utils::align_up};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Protection {
    NoAccess,
    ReadOnly,
    ReadWrite,
}

/// An anonymous OS mapping. The mapping is owned exclusively and released
/// exactly once on drop.
pub struct VirtualMemory {
    region: MemoryRegion,
}

unsafe impl Send for VirtualMemory {}
unsafe impl Sync for VirtualMemory {}

impl VirtualMemory {
    pub fn start(&self) -> usize {
        self.region.start()
    }

    pub fn end(&self) -> usize {
        self.region.end()
    }

    pub fn address(&self) -> *mut u8 {
        self.region.pointer()
    }

    pub fn size(&self) -> usize {
        self.region.size()
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn contains(&self, address: usize) -> bool {
        self.region.contains(address)
    }

    pub fn protect(&self, mode: Protection) {
        unsafe { raw_protect(self.address(), self.size(), mode) }
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::ptr::null_mut;

        impl VirtualMemory {
            /// Maps `size` bytes of zero-initialized read-write memory,
            /// rounded up to the OS page size. Address-space exhaustion has
            /// no recovery path; callers treat `None` as fatal.
            pub fn allocate(size: usize, name: &'static str) -> Option<Box<Self>> {
                let size = align_up(size, page_size());

                let address = unsafe {
                    libc::mmap(
                        null_mut(),
                        size,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                        -1,
                        0,
                    )
                };

                if address == libc::MAP_FAILED {
                    return None;
                }

                log::trace!(target: "gc", "mapped {} bytes at {:p} for {}", size, address, name);

                Some(Box::new(VirtualMemory {
                    region: MemoryRegion::new(address as *mut u8, size),
                }))
            }
        }

        /// Changes the protection of an arbitrary page-aligned range, e.g. a
        /// single semispace inside a larger mapping.
        pub unsafe fn protect_range(address: *mut u8, size: usize, mode: Protection) {
            raw_protect(address, size, mode)
        }

        unsafe fn raw_protect(address: *mut u8, size: usize, mode: Protection) {
            let prot = match mode {
                Protection::NoAccess => libc::PROT_NONE,
                Protection::ReadOnly => libc::PROT_READ,
                Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            };

            if libc::mprotect(address as _, size, prot) != 0 {
                panic!("mprotect(0x{:x}, 0x{:x}, {}) failed", address as usize, size, prot);
            }
        }

        impl Drop for VirtualMemory {
            fn drop(&mut self) {
                unsafe {
                    if libc::munmap(self.address() as _, self.size()) != 0 {
                        panic!("munmap error");
                    }
                }
            }
        }

        fn determine_page_size() -> usize {
            let val = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

            if val <= 0 {
                panic!("could not determine page size");
            }

            val as usize
        }
    } else {
        compile_error!("gengc only supports unix targets");
    }
}

static PAGE_SIZE: Lazy<usize> = Lazy::new(determine_page_size);

pub fn page_size() -> usize {
    *PAGE_SIZE
}
