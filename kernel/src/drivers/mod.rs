//! Device drivers.
//!
//! Just enough hardware to run a shell over serial: a console (serial out,
//! keyboard in) and the PS/2 keyboard that feeds it.

pub mod console;
pub mod keyboard;

/// Initialize all drivers.
pub fn init() {
    log::info!("drivers::init starting");
    console::init();
    keyboard::init();
    crate::println!("[DRIVERS] console and keyboard initialized");
    log::info!("drivers::init complete");
}
