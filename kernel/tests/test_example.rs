//! Exercises the `kernel_test!`/`test_module!` macros through the crate's
//! own custom test framework, rather than `#[test]`, since this binary runs
//! under `no_std`.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(pebble_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use pebble_kernel::{kernel_assert, kernel_assert_eq, kernel_test, test_module};

test_module!(basic_tests,
    test_addition => {
        let result = 2 + 2;
        kernel_assert_eq!(result, 4);
        Ok(())
    },

    test_page_flags_combine => {
        use pebble_kernel::mm::PageFlags;
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        kernel_assert!(flags.contains(PageFlags::PRESENT));
        kernel_assert!(flags.contains(PageFlags::WRITABLE));
        kernel_assert!(!flags.contains(PageFlags::USER));
        Ok(())
    },

    test_tid_allocation_is_monotonic => {
        use pebble_kernel::sched::task::alloc_tid;
        let a = alloc_tid();
        let b = alloc_tid();
        kernel_assert!(b > a);
        Ok(())
    }
);

#[no_mangle]
pub extern "C" fn _start() -> ! {
    pebble_kernel::serial_println!("\n=== Running Example Tests ===\n");
    test_main();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    pebble_kernel::test_framework::test_panic_handler(info)
}
