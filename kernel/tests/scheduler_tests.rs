//! On-target integration coverage for the scheduler's priority invariants:
//! preemption on creation, multi-lock donation, sleep ordering, and the
//! fork/wait reaping contract. Boots like the benches do (real bootloader
//! entry point, real heap and frame allocator) rather than through the
//! custom `#[test_case]` harness, since these scenarios need actual
//! concurrent threads and real ticks, not host stand-ins.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

extern crate alloc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bootloader_api::config::Mapping;
use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

use pebble_kernel::sched::task::{Thread, UserState, PRI_DEFAULT};
use pebble_kernel::sync::{lock::Lock, semaphore::Semaphore};
use pebble_kernel::{arch, exit_qemu, mm, process, sched, serial_println, timer, QemuExitCode};

static CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &CONFIG);

fn boot() {
    let phys_mem_offset = unsafe { BOOT_INFO.unwrap() };
    let regions = unsafe { BOOT_REGIONS.as_ref().unwrap() };
    arch::init();
    mm::init(phys_mem_offset, regions).expect("memory init failed");
    sched::init();
    process::init();
    arch::enable_interrupts();
}

static mut BOOT_INFO: Option<u64> = None;
static mut BOOT_REGIONS: Option<Vec<(u64, u64)>> = None;

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    serial_println!("Scheduler Integration Tests");
    serial_println!("===========================");

    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");
    let mut regions = Vec::new();
    for region in boot_info.memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable {
            regions.push((region.start, region.end));
        }
    }
    // SAFETY: single-threaded, runs once before any other access.
    unsafe {
        BOOT_INFO = Some(phys_mem_offset);
        BOOT_REGIONS = Some(regions);
    }
    boot();

    s1_priority_preemption_on_creation();
    s2_two_level_donation_chain();
    s3_sleep_wakes_in_deadline_order();
    s6_slab_round_trip_returns_pages();
    s5_fork_and_wait_reaps_exit_status();

    serial_println!("All scheduler tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("scheduler test panic: {}", info);
    exit_qemu(QemuExitCode::Failed)
}

/// S1: main runs at PRI_DEFAULT (31); spawning a thread at a higher priority
/// must run it to completion (or its first block) before `spawn` returns.
fn s1_priority_preemption_on_creation() {
    static RAN: AtomicBool = AtomicBool::new(false);

    extern "C" fn hi_fn() -> ! {
        RAN.store(true, Ordering::SeqCst);
        loop {
            sched::yield_cpu();
        }
    }

    assert_eq!(sched::current().priority(), PRI_DEFAULT);
    sched::spawn("H", hi_fn, 40);
    assert!(RAN.load(Ordering::SeqCst), "higher-priority thread must run before spawn() returns");
    serial_println!("S1 ok: priority preemption on thread creation");
}

/// S2: L(10) holds two locks; M(20) blocks on one, H(30) blocks on the
/// other. L's effective priority must climb 10 -> 20 -> 30 as each donor
/// queues up, then unwind 30 -> 20 -> 10 one release at a time.
///
/// Orchestrated with `timer::sleep` rather than ad hoc handshakes: while the
/// orchestrating thread sleeps, nothing else outranks the lower-priority
/// worker threads, so each one runs to its next blocking point atomically
/// before control returns here.
fn s2_two_level_donation_chain() {
    static LOCK1: pebble_kernel::sync::once_lock::GlobalState<Arc<Lock>> =
        pebble_kernel::sync::once_lock::GlobalState::new();
    static LOCK2: pebble_kernel::sync::once_lock::GlobalState<Arc<Lock>> =
        pebble_kernel::sync::once_lock::GlobalState::new();
    static LOW: pebble_kernel::sync::once_lock::GlobalState<Arc<Thread>> =
        pebble_kernel::sync::once_lock::GlobalState::new();
    static GO: Semaphore = Semaphore::new(0);

    extern "C" fn low_fn() -> ! {
        let l1 = LOCK1.with(Arc::clone).unwrap();
        let l2 = LOCK2.with(Arc::clone).unwrap();
        l1.acquire();
        l2.acquire();
        GO.down(); // released once the test has observed eff == 30
        l2.release();
        GO.down(); // released once the test has observed eff == 20
        l1.release();
        loop {
            sched::yield_cpu();
        }
    }
    extern "C" fn mid_fn() -> ! {
        let l1 = LOCK1.with(Arc::clone).unwrap();
        l1.acquire();
        l1.release();
        loop {
            sched::yield_cpu();
        }
    }
    extern "C" fn high_fn() -> ! {
        let l2 = LOCK2.with(Arc::clone).unwrap();
        l2.acquire();
        l2.release();
        loop {
            sched::yield_cpu();
        }
    }

    LOCK1.init(Arc::new(Lock::new())).ok();
    LOCK2.init(Arc::new(Lock::new())).ok();

    let low = sched::spawn("L", low_fn, 10);
    LOW.init(low.clone()).ok();
    timer::sleep(2); // let L acquire both locks and block on GO

    assert_eq!(low.priority(), 10, "uncontended holder keeps its base priority");

    sched::spawn("M", mid_fn, 20);
    timer::sleep(2); // let M block on l1, donating
    assert_eq!(low.priority(), 20, "L.eff must rise to M's priority");

    sched::spawn("H", high_fn, 30);
    timer::sleep(2); // let H block on l2, donating
    assert_eq!(low.priority(), 30, "L.eff must rise to H's priority");

    GO.up();
    timer::sleep(2); // let L release l2 and wake H
    assert_eq!(low.priority(), 20, "releasing l2 must drop L back to M's donation only");

    GO.up();
    timer::sleep(2); // let L release l1 and wake M
    assert_eq!(low.priority(), 10, "releasing l1 must drop L back to its base priority");

    serial_println!("S2 ok: two-level donation chain unwinds 10,20,30,20,10");
}

/// S3: three sleepers at ticks 50, 20, 80 (requested in that order) must
/// wake in deadline order: the 20-tick sleeper first, then 50, then 80.
fn s3_sleep_wakes_in_deadline_order() {
    static ORDER: Mutex3 = Mutex3::new();
    static DONE: AtomicUsize = AtomicUsize::new(0);

    struct Mutex3 {
        inner: spin::Mutex<Vec<u8>>,
    }
    impl Mutex3 {
        const fn new() -> Self {
            Self { inner: spin::Mutex::new(Vec::new()) }
        }
    }

    extern "C" fn sleeper1() -> ! {
        timer::sleep(50);
        ORDER.inner.lock().push(1);
        DONE.fetch_add(1, Ordering::SeqCst);
        loop {
            sched::yield_cpu();
        }
    }
    extern "C" fn sleeper2() -> ! {
        timer::sleep(20);
        ORDER.inner.lock().push(2);
        DONE.fetch_add(1, Ordering::SeqCst);
        loop {
            sched::yield_cpu();
        }
    }
    extern "C" fn sleeper3() -> ! {
        timer::sleep(80);
        ORDER.inner.lock().push(3);
        DONE.fetch_add(1, Ordering::SeqCst);
        loop {
            sched::yield_cpu();
        }
    }

    sched::spawn("sleeper-1", sleeper1, PRI_DEFAULT);
    sched::spawn("sleeper-2", sleeper2, PRI_DEFAULT);
    sched::spawn("sleeper-3", sleeper3, PRI_DEFAULT);

    while DONE.load(Ordering::SeqCst) < 3 {
        timer::sleep(5);
    }

    assert_eq!(&ORDER.inner.lock()[..], &[2, 1, 3], "sleepers must wake in deadline order, not request order");
    serial_println!("S3 ok: sleep wakes in deadline order");
}

/// S6: for each slab size class, allocate one more block than fits in a
/// single arena, then free every other block (reverse order) followed by
/// the remainder -- both backing pages must return to the frame pool.
fn s6_slab_round_trip_returns_pages() {
    use pebble_kernel::mm::slab::SIZE_CLASSES;

    for class in SIZE_CLASSES {
        let before = pebble_kernel::mm::frame_allocator::FRAME_ALLOCATOR
            .lock()
            .free_count(pebble_kernel::Pool::Kernel);

        let n = class.blocks_per_arena() + 1;
        let mut blocks = Vec::with_capacity(n);
        for _ in 0..n {
            blocks.push(pebble_kernel::mm::slab::allocate(class.size()).expect("slab allocation failed"));
        }

        let mut i = blocks.len();
        while i > 1 {
            i -= 2;
            // SAFETY: each pointer was returned by `allocate` above and freed
            // exactly once here.
            unsafe { pebble_kernel::mm::slab::free(blocks[i + 1], class.size()) };
        }
        for ptr in blocks.into_iter().step_by(2) {
            // SAFETY: see above; the even-indexed blocks were never freed by
            // the loop above.
            unsafe { pebble_kernel::mm::slab::free(ptr, class.size()) };
        }

        let after = pebble_kernel::mm::frame_allocator::FRAME_ALLOCATOR
            .lock()
            .free_count(pebble_kernel::Pool::Kernel);
        assert_eq!(after, before, "slab class {} must return every page it borrowed", class.size());
    }

    serial_println!("S6 ok: slab round trip returns all backing pages");
}

/// S5: fork a child, have it exit(42) immediately, have the parent wait()
/// for it and see 42, then a second wait() on the same tid must fail.
///
/// The child here is never actually scheduled -- this kernel has no ELF
/// image to give it a valid ring-3 entry point in a test binary, so running
/// it for real isn't possible. Instead this drives the real `fork`/`wait`
/// machinery directly: `fork()` builds and registers the child exactly as
/// the `fork` syscall does, and the child's exit is simulated by applying
/// the same state `process::exit::exit` would have left behind (status and
/// a raised `exited` semaphore) without going through `sched::exit_current`,
/// which would be unsound to call on a thread that was never running.
fn s5_fork_and_wait_reaps_exit_status() {
    use pebble_kernel::mm::vas::VirtualAddressSpace;
    use pebble_kernel::process::{fork, table};
    use pebble_kernel::sched::task::{Tid, UserFrame};

    let mut vas = VirtualAddressSpace::new();
    vas.init().expect("parent vas init");
    let page_table_root = vas.get_page_table();
    let parent_user = UserState::new(vas, None, alloc::string::String::from("/"));
    let parent = Thread::new(pebble_kernel::sched::task::alloc_tid(), alloc::string::String::from("parent"), 0, 0);
    // SAFETY: `parent` was just built and is never published to the ready
    // queue -- this thread only exists to host bookkeeping for this test.
    unsafe { parent.set_context_cr3(page_table_root) };
    let parent = parent.with_user(parent_user);

    let resume = UserFrame { rip: 0, rsp: 0, rflags: 0x202, rax: 0, rdi: 0, rsi: 0 };
    let child_tid: Tid = fork::fork(&parent, resume).expect("fork failed");

    // Simulate the child immediately calling exit(42), without scheduling it.
    {
        let child = table::get(child_tid).expect("child registered by fork()");
        let child_user_lock = child.user.as_ref().unwrap();
        let mut child_user = child_user_lock.lock();
        child_user.exit_status = 42;
        let exited = child_user.exited.clone();
        drop(child_user);
        exited.up();
    }

    let status = pebble_kernel::process::exit::wait(&parent, child_tid).expect("wait should reap the exited child");
    assert_eq!(status, 42);

    assert!(pebble_kernel::process::exit::wait(&parent, child_tid).is_err(), "a second wait() on a reaped child must fail");

    serial_println!("S5 ok: fork + wait reaps exit status and rejects a double wait");
}
