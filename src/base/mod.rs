pub mod bitfield;
pub mod constants;
pub mod memory_region;
pub mod utils;
pub mod virtual_memory;
