//! Kernel library.
//!
//! A single-CPU, x86_64, preemptive priority-scheduling kernel: one thread
//! abstraction shared by kernel and user code, synchronization primitives
//! with priority donation, a tick-driven sleep/wake service, a two-tier
//! physical/heap allocator, and the syscall boundary user processes run
//! against. Exports the pieces the integration test binaries and benches
//! need.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
// Custom test runner only for bare-metal; host target uses standard #[test] harness.
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// On bare metal the kernel heap (see `mm::heap`) backs allocation. On host
// (x86_64-unknown-linux-gnu), for running the test suite under `cargo test`,
// delegate to the system allocator so Vec/String/alloc work normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

mod intrinsics;

pub mod arch;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod irq;
pub mod logging;
pub mod mm;
pub mod process;
pub mod raii;
pub mod sched;
pub mod sync;
mod syscall;
pub mod timer;

pub mod test_framework;

// Re-export memory management and scheduler items for tests and benches.
pub use mm::{FrameNumber, Pool, FRAME_SIZE};
pub use sched::{Thread, ThreadState, Tid};
#[cfg(test)]
pub use test_framework::test_runner;
pub use test_framework::{
    cycles_to_ns, exit_qemu, read_timestamp, test_panic_handler, BenchmarkRunner, QemuExitCode,
    Testable,
};

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}

/// Heap allocation error handler.
///
/// Panic is intentional: heap allocation failure in a no_std kernel is
/// unrecoverable. The alloc_error_handler ABI requires `-> !`.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("Allocation error: {:?}", layout);
}
