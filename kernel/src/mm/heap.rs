//! Kernel heap.
//!
//! [`crate::mm::slab::SlabAllocator`] is installed as `#[global_allocator]`.
//! Unlike a classic bump/pool heap there is no fixed region to map up
//! front: the slab allocator pulls pages directly from the kernel frame
//! pool, one arena at a time, through the identity-mapped physical memory
//! window, and hands them back the moment an arena empties out. `init` is
//! kept only so `mm::init` has a uniform place to bring every subsystem up.

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: super::slab::SlabAllocator = super::slab::SlabAllocator::empty();

#[cfg(target_os = "none")]
pub fn init() -> Result<(), crate::error::KernelError> {
    Ok(())
}

/// On host builds the system allocator is already installed; nothing to do.
#[cfg(not(target_os = "none"))]
pub fn init() -> Result<(), crate::error::KernelError> {
    Ok(())
}
