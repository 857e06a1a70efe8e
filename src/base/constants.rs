#[cfg(target_pointer_width = "64")]
pub const WORD_SIZE_LOG2: usize = 3;
#[cfg(target_pointer_width = "32")]
pub const WORD_SIZE_LOG2: usize = 2;

pub const WORD_SIZE: usize = 1 << WORD_SIZE_LOG2;

pub const BITS_PER_BYTE_LOG2: usize = 3;
pub const BITS_PER_WORD: usize = 1 << (WORD_SIZE_LOG2 + BITS_PER_BYTE_LOG2);

/// Objects are aligned to two words so that a header plus payload always
/// starts on a double-word boundary and block sizes stay multiples of the
/// minimum free-block size.
pub const OBJECT_ALIGNMENT: usize = 2 * WORD_SIZE;
pub const OBJECT_ALIGNMENT_LOG2: usize = WORD_SIZE_LOG2 + 1;
pub const OBJECT_ALIGNMENT_MASK: usize = OBJECT_ALIGNMENT - 1;

/// The universal "no object here" sentinel. Every pointer-returning
/// operation in the heap yields this exact value on failure; the type layer
/// above compares against it directly.
pub const UNALLOCATED: usize = 0;
