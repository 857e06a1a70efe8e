pub mod base;
pub mod heap;

pub use base::constants::UNALLOCATED;
pub use heap::collector::{CollectorState, CollectorStats};
pub use heap::heap::{Class, Heap, HeapArguments, HeapOptions};
pub use heap::local::{Handle, LocalPage};
pub use heap::pointer::{ObjectState, Pointer};

#[cfg(test)]
pub mod tests;
