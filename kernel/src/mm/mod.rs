//! Memory management: physical frames, paging, the kernel heap, and
//! per-process address spaces.
//!
//! Physical memory is identity-mapped by the bootloader starting at
//! [`PHYS_MEM_OFFSET`]; [`phys_to_virt_addr`] is the one place that offset
//! gets applied, so every other module works in physical addresses and
//! only crosses into virtual ones at the page-table-walk boundary.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU64, Ordering};

pub mod frame_allocator;
pub mod heap;
pub mod page_table;
pub mod slab;
pub mod vas;

pub use frame_allocator::{FrameAllocator, FrameGuard, FrameNumber, Pool, FRAME_ALLOCATOR, FRAME_SIZE};
pub use vas::VirtualAddressSpace;

pub const PAGE_SIZE: usize = frame_allocator::FRAME_SIZE;

/// Virtual offset at which the bootloader identity-maps all physical
/// memory. Set once during [`init`] from the boot info the loader hands
/// the kernel; `0` until then.
static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// Page size options.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Small = 4096,
    Large = 2 * 1024 * 1024,
    Huge = 1024 * 1024 * 1024,
}

/// Page table entry flags, x86_64 layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(u64);

impl PageFlags {
    pub const PRESENT: Self = Self(1 << 0);
    pub const WRITABLE: Self = Self(1 << 1);
    pub const USER: Self = Self(1 << 2);
    pub const WRITE_THROUGH: Self = Self(1 << 3);
    pub const NO_CACHE: Self = Self(1 << 4);
    pub const ACCESSED: Self = Self(1 << 5);
    pub const DIRTY: Self = Self(1 << 6);
    pub const HUGE: Self = Self(1 << 7);
    pub const GLOBAL: Self = Self(1 << 8);
    pub const NO_EXECUTE: Self = Self(1 << 63);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Convert a physical address into a pointer-sized virtual address inside
/// the bootloader's identity-mapped physical memory window.
///
/// Used to reach page tables and freshly allocated frames by their
/// physical address before any higher-level mapping exists for them.
pub fn phys_to_virt_addr(phys: PhysicalAddress) -> usize {
    (PHYS_MEM_OFFSET.load(Ordering::Acquire) + phys.as_u64()) as usize
}

/// Record the bootloader's physical-memory-offset and seed the frame
/// allocator from its reported usable regions. Must run once, before any
/// other `mm` function, with interrupts disabled.
pub fn init(phys_mem_offset: u64, usable_regions: &[(u64, u64)]) -> Result<(), crate::error::KernelError> {
    log::info!("mm::init starting");
    PHYS_MEM_OFFSET.store(phys_mem_offset, Ordering::Release);

    let mut allocator = FRAME_ALLOCATOR.lock();
    for &(start, end) in usable_regions {
        let first_frame = start / PAGE_SIZE as u64;
        let frame_count = ((end - start) / PAGE_SIZE as u64) as usize;
        allocator.seed_region(first_frame, frame_count);
    }
    drop(allocator);

    heap::init()?;
    crate::println!("[MM] memory management initialized");
    log::info!("mm::init complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn page_flags_contains_is_bitwise() {
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        assert!(flags.contains(PageFlags::PRESENT));
        assert!(flags.contains(PageFlags::WRITABLE));
        assert!(!flags.contains(PageFlags::USER));
    }

    #[test_case]
    fn phys_to_virt_applies_offset() {
        PHYS_MEM_OFFSET.store(0x1000_0000, Ordering::Release);
        assert_eq!(phys_to_virt_addr(PhysicalAddress::new(0x2000)), 0x1000_2000);
    }
}
