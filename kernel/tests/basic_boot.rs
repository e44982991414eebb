//! Smoke test: the kernel image boots far enough to run code and exit QEMU
//! cleanly. No scheduler, no heap -- just confirms the panic handler and
//! the QEMU debug-exit device both work before anything heavier runs.

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use pebble_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    serial_println!("Starting basic boot tests...");

    test_println();
    test_simple_assertion();

    serial_println!("All tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_println() {
    serial_println!("test_println output");
}

fn test_simple_assertion() {
    let x = 2 + 2;
    assert_eq!(x, 4);
}
