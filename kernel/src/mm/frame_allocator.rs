//! Physical frame allocator.
//!
//! A bitmap over all usable physical memory, split at boot into a kernel
//! pool and a user pool so a runaway user process can't starve the kernel
//! of the frames it needs for page tables and kernel stacks. Each pool is
//! a flat bitmap (1 = free): simple, bounded, and enough for a single-CPU
//! teaching kernel — no buddy system, no NUMA, no per-CPU caches.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::error::KernelError;

use super::PhysicalAddress;

pub const FRAME_SIZE: usize = 4096;

/// Number of `u64` bitmap words per pool; 1024 words covers 256Mi of frames
/// per pool (4GiB), comfortably more than a QEMU teaching VM's RAM.
const BITMAP_WORDS: usize = 1024;

/// Ceiling on how many frames `seed_region` will hand to the user pool,
/// unset (unlimited) by default. Settable once at boot from a `-ul`-style
/// command-line option, mirroring Pintos's `user_page_limit`.
static USER_PAGE_LIMIT: AtomicUsize = AtomicUsize::new(usize::MAX);

/// Cap the user pool at `limit` frames, effective for the next call to
/// [`FrameAllocator::seed_region`]. Intended to run once during early boot,
/// before `mm::init` seeds the pools.
pub fn set_user_page_limit(limit: usize) {
    USER_PAGE_LIMIT.store(limit, Ordering::Release);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn addr(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * FRAME_SIZE as u64)
    }
}

impl PhysicalAddress {
    pub fn frame(self) -> FrameNumber {
        FrameNumber(self.as_u64() / FRAME_SIZE as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Kernel,
    User,
}

struct Bitmap {
    words: Mutex<[u64; BITMAP_WORDS]>,
    start_frame: u64,
    total_frames: usize,
    free_frames: AtomicUsize,
}

impl Bitmap {
    const fn new(start_frame: u64, total_frames: usize) -> Self {
        Self {
            words: Mutex::new([0; BITMAP_WORDS]),
            start_frame,
            total_frames,
            free_frames: AtomicUsize::new(0),
        }
    }

    /// Mark `[start_frame, start_frame + count)` free; called once at boot
    /// with the region the bootloader's memory map reports as usable.
    fn seed_free(&self, first: u64, count: usize) {
        let mut words = self.words.lock();
        for i in 0..count {
            let bit = (first - self.start_frame) as usize + i;
            if bit >= self.total_frames {
                break;
            }
            words[bit / 64] |= 1 << (bit % 64);
        }
        self.free_frames.fetch_add(count, Ordering::Relaxed);
    }

    fn allocate(&self) -> Option<FrameNumber> {
        let mut words = self.words.lock();
        for (word_idx, word) in words.iter_mut().enumerate() {
            if *word == 0 {
                continue;
            }
            let bit = word.trailing_zeros() as usize;
            *word &= !(1 << bit);
            self.free_frames.fetch_sub(1, Ordering::Relaxed);
            return Some(FrameNumber(self.start_frame + (word_idx * 64 + bit) as u64));
        }
        None
    }

    fn free(&self, frame: FrameNumber) -> Result<(), KernelError> {
        let offset = frame.as_u64().checked_sub(self.start_frame);
        let bit = match offset {
            Some(b) if (b as usize) < self.total_frames => b as usize,
            _ => {
                return Err(KernelError::InvalidAddress {
                    addr: frame.as_u64() as usize,
                })
            }
        };
        let mut words = self.words.lock();
        let word = &mut words[bit / 64];
        let mask = 1u64 << (bit % 64);
        if *word & mask != 0 {
            return Err(KernelError::InvalidArgument {
                name: "frame",
                value: "double free",
            });
        }
        *word |= mask;
        self.free_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn free_count(&self) -> usize {
        self.free_frames.load(Ordering::Relaxed)
    }
}

pub struct FrameAllocator {
    kernel: Bitmap,
    user: Bitmap,
}

impl FrameAllocator {
    const fn new() -> Self {
        Self {
            kernel: Bitmap::new(0, BITMAP_WORDS * 64),
            user: Bitmap::new((BITMAP_WORDS * 64) as u64, BITMAP_WORDS * 64),
        }
    }

    /// Seed both pools from a usable physical memory range reported by the
    /// bootloader. The user pool gets half the frames, bounded above by
    /// [`USER_PAGE_LIMIT`]; the kernel pool gets whatever is left, so a
    /// runaway user allocation can never starve kernel-side page tables and
    /// stacks of their share.
    pub fn seed_region(&self, first_frame: u64, frame_count: usize) {
        let user_limit = USER_PAGE_LIMIT.load(Ordering::Acquire);
        let user_share = (frame_count / 2).min(user_limit);
        let kernel_share = frame_count - user_share;

        self.kernel.seed_free(first_frame, kernel_share.min(self.kernel.total_frames));

        let user_start = first_frame + kernel_share as u64;
        self.user.seed_free(
            self.user.start_frame.max(user_start).min(self.user.start_frame + self.user.total_frames as u64),
            user_share.min(self.user.total_frames),
        );
    }

    pub fn allocate(&self, pool: Pool) -> Result<FrameNumber, KernelError> {
        let bitmap = match pool {
            Pool::Kernel => &self.kernel,
            Pool::User => &self.user,
        };
        bitmap.allocate().ok_or(KernelError::OutOfMemory {
            requested: FRAME_SIZE,
            available: bitmap.free_count() * FRAME_SIZE,
        })
    }

    pub fn free(&self, pool: Pool, frame: FrameNumber) -> Result<(), KernelError> {
        match pool {
            Pool::Kernel => self.kernel.free(frame),
            Pool::User => self.user.free(frame),
        }
    }

    pub fn free_count(&self, pool: Pool) -> usize {
        match pool {
            Pool::Kernel => self.kernel.free_count(),
            Pool::User => self.user.free_count(),
        }
    }

    /// Compatibility entry point for [`page_table::FrameAllocator`](super::page_table::FrameAllocator)
    /// callers that allocate page-table frames one at a time out of the
    /// kernel pool. `numa_node` is accepted and ignored; this kernel is
    /// single-node. `count` must be 1 — page tables are allocated a frame at
    /// a time, never in bulk.
    pub fn allocate_frames(
        &mut self,
        count: usize,
        _numa_node: Option<usize>,
    ) -> Result<FrameNumber, KernelError> {
        if count != 1 {
            return Err(KernelError::InvalidArgument {
                name: "count",
                value: "only single-frame allocation is supported",
            });
        }
        self.allocate(Pool::Kernel)
    }

    /// Compatibility counterpart to [`Self::allocate_frames`].
    pub fn free_frames(&mut self, frame: FrameNumber, count: usize) -> Result<(), KernelError> {
        if count != 1 {
            return Err(KernelError::InvalidArgument {
                name: "count",
                value: "only single-frame free is supported",
            });
        }
        self.free(Pool::Kernel, frame)
    }
}

pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

/// RAII guard that frees its frame on drop; used for page-table frames
/// allocated and then abandoned on an error path partway through mapping.
pub struct FrameGuard {
    pool: Pool,
    frame: FrameNumber,
    armed: bool,
}

impl FrameGuard {
    pub fn new(pool: Pool) -> Result<Self, KernelError> {
        let frame = FRAME_ALLOCATOR.lock().allocate(pool)?;
        Ok(Self {
            pool,
            frame,
            armed: true,
        })
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Disarm the guard, transferring ownership of the frame to the caller.
    pub fn into_frame(mut self) -> FrameNumber {
        self.armed = false;
        self.frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = FRAME_ALLOCATOR.lock().free(self.pool, self.frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn allocate_and_free_roundtrip() {
        let alloc = FRAME_ALLOCATOR.lock();
        alloc.seed_region(0, 16);
        let before = alloc.free_count(Pool::Kernel);
        let frame = alloc.allocate(Pool::Kernel).unwrap();
        assert_eq!(alloc.free_count(Pool::Kernel), before - 1);
        alloc.free(Pool::Kernel, frame).unwrap();
        assert_eq!(alloc.free_count(Pool::Kernel), before);
    }

    #[test_case]
    fn double_free_is_rejected() {
        let alloc = FRAME_ALLOCATOR.lock();
        alloc.seed_region(1000, 4);
        let frame = alloc.allocate(Pool::User).unwrap();
        alloc.free(Pool::User, frame).unwrap();
        assert!(alloc.free(Pool::User, frame).is_err());
    }

    #[test_case]
    fn seed_region_splits_half_to_user_by_default() {
        let alloc = FRAME_ALLOCATOR.lock();
        let user_before = alloc.free_count(Pool::User);
        let kernel_before = alloc.free_count(Pool::Kernel);
        alloc.seed_region(2000, 20);
        assert_eq!(alloc.free_count(Pool::User) - user_before, 10);
        assert_eq!(alloc.free_count(Pool::Kernel) - kernel_before, 10);
    }

    #[test_case]
    fn seed_region_honors_user_page_limit() {
        set_user_page_limit(3);
        let alloc = FRAME_ALLOCATOR.lock();
        let user_before = alloc.free_count(Pool::User);
        let kernel_before = alloc.free_count(Pool::Kernel);
        alloc.seed_region(3000, 20);
        set_user_page_limit(usize::MAX);
        assert_eq!(alloc.free_count(Pool::User) - user_before, 3);
        assert_eq!(alloc.free_count(Pool::Kernel) - kernel_before, 17);
    }
}
