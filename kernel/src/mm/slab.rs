//! Two-tier kernel allocator.
//!
//! Tier A is [`super::frame_allocator`]: raw 4KiB physical pages. Tier B,
//! built here, carves those pages into fixed power-of-two size classes so
//! small short-lived allocations (a `Thread`, a `Vec` backing store, an IDT
//! trampoline closure) don't each cost a whole page.
//!
//! Every class's objects live in "arenas" -- one page at a time, pulled from
//! the kernel frame pool on demand through the identity-mapped physical
//! memory window, never pre-reserved as one big virtual region. An arena
//! carries a small header (magic, owning class, live-object count, an
//! intrusive free list) at its first bytes; once every object in an arena
//! is freed, the whole page goes back to the frame pool rather than sitting
//! idle in a free list forever. Anything bigger than half a page bypasses
//! the classes entirely and maps straight to frame_allocator pages.

#[cfg(feature = "alloc")]
extern crate alloc;

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use spin::Mutex;

use super::frame_allocator::{FrameNumber, Pool, FRAME_ALLOCATOR, FRAME_SIZE};
use super::phys_to_virt_addr;
use crate::error::KernelError;

/// A free object's "next" pointer, written into the object's own storage
/// while it's on a class's free list -- the same trick the original
/// single-tier allocator used, just scoped to one arena page at a time.
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

const ARENA_MAGIC: u32 = 0x5341_4245; // "SABE", read as bytes

/// Lives at the start of every arena page (and, with `class_idx == -1`, at
/// the start of a big-block allocation's first page). `count` means
/// different things in each case: outstanding live objects for a slab
/// arena, page span for a big block.
#[repr(C)]
struct BlockHeader {
    magic: u32,
    class_idx: i32,
    count: u32,
    _pad: u32,
    free_list: Option<NonNull<FreeNode>>,
    frame: FrameNumber,
}

const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

/// One power-of-two object size. Doubling steps from the smallest
/// worthwhile allocation up to one eighth of a page; anything at or above
/// [`BIG_BLOCK_THRESHOLD`] bypasses these entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeClass(usize);

impl SizeClass {
    pub const fn size(&self) -> usize {
        self.0
    }

    /// Byte offset of the first object in an arena of this class, the
    /// header rounded up to the class's own alignment so every object
    /// lands naturally aligned.
    const fn first_block_offset(&self) -> usize {
        (HEADER_SIZE + self.0 - 1) & !(self.0 - 1)
    }

    pub const fn blocks_per_arena(&self) -> usize {
        (FRAME_SIZE - self.first_block_offset()) / self.0
    }
}

pub const SIZE_CLASSES: [SizeClass; 8] = [
    SizeClass(16),
    SizeClass(32),
    SizeClass(64),
    SizeClass(128),
    SizeClass(256),
    SizeClass(512),
    SizeClass(1024),
    SizeClass(2048),
];

/// Allocations at or above this size skip the size-class ladder and get
/// their own run of pages straight from the frame pool.
pub const BIG_BLOCK_THRESHOLD: usize = FRAME_SIZE / 2;

fn class_for(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|c| size <= c.size())
}

/// One size class's live arenas. An arena stays in this list from the
/// moment it's carved until its last object is freed.
struct ClassState {
    arenas: alloc::vec::Vec<NonNull<BlockHeader>>,
}

// SAFETY: every access goes through `SlabAllocator`'s per-class Mutex.
unsafe impl Send for ClassState {}

impl ClassState {
    const fn new() -> Self {
        Self { arenas: alloc::vec::Vec::new() }
    }
}

/// Carve a fresh arena page for `class` out of the kernel frame pool and
/// initialize its header and free list. Returns the header pointer.
fn new_arena(class_idx: usize) -> Option<NonNull<BlockHeader>> {
    let class = SIZE_CLASSES[class_idx];
    let frame = FRAME_ALLOCATOR.lock().allocate(Pool::Kernel).ok()?;
    let page = phys_to_virt_addr(frame.addr()) as *mut u8;

    // SAFETY: `page` is a freshly allocated, exclusively owned physical
    // frame reached through the kernel's identity-mapped physical memory
    // window; nothing else holds a reference to it yet.
    unsafe {
        let header = page as *mut BlockHeader;
        header.write(BlockHeader {
            magic: ARENA_MAGIC,
            class_idx: class_idx as i32,
            count: 0,
            _pad: 0,
            free_list: None,
            frame,
        });

        let mut offset = class.first_block_offset();
        let mut head: Option<NonNull<FreeNode>> = None;
        for _ in 0..class.blocks_per_arena() {
            let node = page.add(offset) as *mut FreeNode;
            node.write(FreeNode { next: head });
            head = NonNull::new(node);
            offset += class.size();
        }
        (*header).free_list = head;
    }

    NonNull::new(page as *mut BlockHeader)
}

/// Header for the arena page `ptr` falls within.
///
/// # Safety
/// `ptr` must have been handed out by [`SlabAllocator::alloc`] for a slab
/// (non-big-block) class.
unsafe fn arena_header_of(ptr: *mut u8) -> *mut BlockHeader {
    let page_base = (ptr as usize) & !(FRAME_SIZE - 1);
    page_base as *mut BlockHeader
}

pub struct SlabAllocator {
    classes: [Mutex<ClassState>; 8],
}

impl SlabAllocator {
    pub const fn empty() -> Self {
        Self {
            classes: [
                Mutex::new(ClassState::new()),
                Mutex::new(ClassState::new()),
                Mutex::new(ClassState::new()),
                Mutex::new(ClassState::new()),
                Mutex::new(ClassState::new()),
                Mutex::new(ClassState::new()),
                Mutex::new(ClassState::new()),
                Mutex::new(ClassState::new()),
            ],
        }
    }

    fn alloc_from_class(&self, idx: usize) -> *mut u8 {
        let mut state = self.classes[idx].lock();

        for &arena in state.arenas.iter() {
            // SAFETY: every pointer in `arenas` was produced by `new_arena`
            // and stays valid until it's removed from this list, which only
            // happens (in `free`) once its free list is confirmed empty.
            unsafe {
                let header = arena.as_ptr();
                if let Some(node) = (*header).free_list {
                    (*header).free_list = (*node.as_ptr()).next;
                    (*header).count += 1;
                    return node.as_ptr() as *mut u8;
                }
            }
        }

        let Some(arena) = new_arena(idx) else {
            return core::ptr::null_mut();
        };
        state.arenas.push(arena);
        // SAFETY: `arena` was just built by `new_arena` with a full free
        // list of at least one node (every class has at least one block
        // per arena).
        unsafe {
            let header = arena.as_ptr();
            let node = (*header).free_list.expect("fresh arena must have a free block");
            (*header).free_list = (*node.as_ptr()).next;
            (*header).count += 1;
            node.as_ptr() as *mut u8
        }
    }

    fn dealloc_to_class(&self, idx: usize, ptr: *mut u8) {
        // SAFETY: caller (`dealloc`/`free`) guarantees `ptr` was allocated
        // from this class and is no longer in use.
        let header = unsafe { arena_header_of(ptr) };
        // SAFETY: `header` points at the start of the page `ptr` lives on,
        // which `alloc_from_class` always stamps with a valid `BlockHeader`.
        unsafe {
            debug_assert_eq!((*header).magic, ARENA_MAGIC);
            let node = ptr as *mut FreeNode;
            node.write(FreeNode { next: (*header).free_list });
            (*header).free_list = NonNull::new(node);
            (*header).count -= 1;

            if (*header).count == 0 {
                let frame = (*header).frame;
                let mut state = self.classes[idx].lock();
                state.arenas.retain(|a| a.as_ptr() != header);
                drop(state);
                let _ = FRAME_ALLOCATOR.lock().free(Pool::Kernel, frame);
            }
        }
    }

    fn alloc_big(&self, size: usize) -> *mut u8 {
        let total = HEADER_SIZE + size;
        let pages = total.div_ceil(FRAME_SIZE);

        let first = match FRAME_ALLOCATOR.lock().allocate(Pool::Kernel) {
            Ok(f) => f,
            Err(_) => return core::ptr::null_mut(),
        };
        // A real buddy/contiguous allocator would hand back `pages`
        // contiguous frames in one call; this bitmap pool only gives out
        // one frame at a time, so big blocks here are limited to a single
        // page's worth of payload (anything else is a logic error in the
        // caller, not a recoverable allocation failure).
        if pages != 1 {
            let _ = FRAME_ALLOCATOR.lock().free(Pool::Kernel, first);
            return core::ptr::null_mut();
        }

        let page = phys_to_virt_addr(first.addr()) as *mut u8;
        // SAFETY: `page` is a freshly allocated, exclusively owned frame.
        unsafe {
            let header = page as *mut BlockHeader;
            header.write(BlockHeader {
                magic: ARENA_MAGIC,
                class_idx: -1,
                count: 1,
                _pad: 0,
                free_list: None,
                frame: first,
            });
            page.add(HEADER_SIZE)
        }
    }

    fn dealloc_big(&self, ptr: *mut u8) {
        // SAFETY: `ptr` was handed out by `alloc_big` at `page + HEADER_SIZE`
        // on its own dedicated page.
        unsafe {
            let header = arena_header_of(ptr);
            debug_assert_eq!((*header).magic, ARENA_MAGIC);
            debug_assert_eq!((*header).class_idx, -1);
            let frame = (*header).frame;
            let _ = FRAME_ALLOCATOR.lock().free(Pool::Kernel, frame);
        }
    }
}

// SAFETY: every mutable access to an arena's header or free list happens
// either under that class's Mutex (`alloc_from_class`) or, for `dealloc`,
// is scoped to the one arena the freed pointer belongs to and only takes
// the class lock for the final bookkeeping step (removing an emptied
// arena), never while another thread could be mutating the same arena.
unsafe impl GlobalAlloc for SlabAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let min_size = layout.size().max(layout.align()).max(1);
        if min_size >= BIG_BLOCK_THRESHOLD {
            self.alloc_big(min_size)
        } else {
            match class_for(min_size) {
                Some(idx) => self.alloc_from_class(idx),
                None => self.alloc_big(min_size),
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let min_size = layout.size().max(layout.align()).max(1);
        if min_size >= BIG_BLOCK_THRESHOLD {
            self.dealloc_big(ptr);
            return;
        }
        match class_for(min_size) {
            Some(idx) => self.dealloc_to_class(idx, ptr),
            None => self.dealloc_big(ptr),
        }
    }
}

static ALLOCATOR: SlabAllocator = SlabAllocator::empty();

/// Allocate `size` bytes through the same two-tier path the global
/// allocator uses. Exposed directly (rather than only through `GlobalAlloc`)
/// for callers, such as tests, that want to drive the slab/arena machinery
/// without going through `alloc::alloc`.
pub fn allocate(size: usize) -> Result<*mut u8, KernelError> {
    let layout = Layout::from_size_align(size, 8).map_err(|_| KernelError::InvalidArgument {
        name: "size",
        value: "invalid layout",
    })?;
    // SAFETY: `layout` is well-formed (checked above).
    let ptr = unsafe { ALLOCATOR.alloc(layout) };
    if ptr.is_null() {
        Err(KernelError::OutOfMemory { requested: size, available: 0 })
    } else {
        Ok(ptr)
    }
}

/// Free a block obtained from [`allocate`].
///
/// # Safety
/// `ptr` must have come from `allocate(size)` with the same `size`, and must
/// not have already been freed.
pub unsafe fn free(ptr: *mut u8, size: usize) {
    let layout = Layout::from_size_align(size, 8).expect("size was already validated by allocate()");
    // SAFETY: forwarded from this function's own safety contract.
    unsafe { ALLOCATOR.dealloc(ptr, layout) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn small_allocations_reuse_freed_slots() {
        FRAME_ALLOCATOR.lock().seed_region(0, 16);
        let a = allocate(24).unwrap();
        // SAFETY: `a` was just allocated and not yet freed.
        unsafe { free(a, 24) };
        let b = allocate(24).unwrap();
        assert_eq!(a, b, "freeing the only live object in an arena must not return its page early");
    }

    #[test_case]
    fn emptying_an_arena_returns_its_page() {
        FRAME_ALLOCATOR.lock().seed_region(100, 16);
        let class = SIZE_CLASSES[0];
        let before = FRAME_ALLOCATOR.lock().free_count(Pool::Kernel);

        let n = class.blocks_per_arena();
        let blocks: alloc::vec::Vec<_> = (0..n).map(|_| allocate(class.size()).unwrap()).collect();
        assert_eq!(FRAME_ALLOCATOR.lock().free_count(Pool::Kernel), before - 1, "one arena page must have been borrowed");

        for ptr in blocks {
            // SAFETY: each pointer was allocated above and freed exactly once.
            unsafe { free(ptr, class.size()) };
        }
        assert_eq!(FRAME_ALLOCATOR.lock().free_count(Pool::Kernel), before, "emptied arena must return its page");
    }

    #[test_case]
    fn big_allocation_bypasses_classes_and_frees_its_page() {
        FRAME_ALLOCATOR.lock().seed_region(200, 16);
        let before = FRAME_ALLOCATOR.lock().free_count(Pool::Kernel);
        let big = allocate(BIG_BLOCK_THRESHOLD).unwrap();
        assert_eq!(FRAME_ALLOCATOR.lock().free_count(Pool::Kernel), before - 1);
        // SAFETY: `big` was just allocated and not yet freed.
        unsafe { free(big, BIG_BLOCK_THRESHOLD) };
        assert_eq!(FRAME_ALLOCATOR.lock().free_count(Pool::Kernel), before);
    }
}
