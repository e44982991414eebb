//! Address-space layout constants for user processes.
//!
//! Everything else a running process's memory needs -- mappings, the heap
//! break, the stack pointer -- lives on [`crate::mm::vas::VirtualAddressSpace`]
//! itself; this module just fixes where things start.

/// Lowest address a user program may map. Page 0 stays unmapped on
/// purpose, so a null pointer dereference faults.
pub const USER_SPACE_START: usize = 0x0000_0000_0001_0000;

/// One past the highest address a user program may map.
pub const USER_SPACE_END: usize = 0x0000_7FFF_FFFF_0000;

/// Conventional load address for a statically linked executable's first
/// segment.
pub const CODE_START: usize = 0x0000_0000_0040_0000;

/// Top of the single page mapped for a fresh process's argument stack,
/// before argv is pushed onto it.
pub const STACK_TOP: usize = 0x0000_7FFF_FFFF_F000;
