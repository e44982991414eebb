//! Kernel binary.
//!
//! The actual entry symbol lives in
//! [`pebble_kernel::arch::x86_64::boot`], generated there by
//! `bootloader_api`'s `entry_point!` macro so integration tests link
//! against the same boot path as the real image. This crate only needs to
//! exist so `cargo` has something to produce a kernel image from.

#![no_std]
#![no_main]

extern crate pebble_kernel;

use core::panic::PanicInfo;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("kernel panic: {}", info);
    pebble_kernel::arch::x86_64::halt();
}
