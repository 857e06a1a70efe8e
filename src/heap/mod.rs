pub mod collector;
pub mod compactor;
pub mod free_list;
pub mod heap;
pub mod local;
pub mod marker;
pub mod page_table;
pub mod pointer;
pub mod scavenger;
pub mod semispace;
pub mod sweeper;
pub mod taskqueue;
pub mod zone;
