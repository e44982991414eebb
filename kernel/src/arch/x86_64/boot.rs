//! Bootloader handoff.
//!
//! `bootloader_api`'s `entry_point!` macro generates the raw `_start`
//! symbol the bootloader jumps to in long mode, with paging and a stack
//! already set up, and calls [`kernel_main`] with a `BootInfo` describing
//! the memory map and where physical memory got mapped. Everything from
//! here down is this crate's own initialization order.

#[cfg(feature = "alloc")]
extern crate alloc;

use bootloader_api::config::Mapping;
use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

/// Map all of physical memory somewhere in kernel space so `mm::init` can
/// address any frame directly, without a separate identity mapping step.
static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

/// Command line for the first user process. Pintos calls this the run
/// command; there's no way yet to plumb one in from the bootloader, so it's
/// fixed until a real boot-args mechanism exists.
const INIT_COMMAND: &str = "init";

/// Largest number of usable physical memory regions this collects before
/// handing them to `mm::init`. The heap isn't up yet at that point, so this
/// has to live on the stack rather than in a `Vec`.
const MAX_USABLE_REGIONS: usize = 64;

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    crate::logging::init();
    log::info!("pebble-kernel starting");

    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");

    let mut regions = [(0u64, 0u64); MAX_USABLE_REGIONS];
    let mut count = 0;
    for region in boot_info.memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable && count < regions.len() {
            regions[count] = (region.start, region.end);
            count += 1;
        }
    }

    crate::arch::init();

    crate::mm::init(phys_mem_offset, &regions[..count]).expect("memory init failed");

    crate::sched::init();
    crate::fs::init();
    crate::process::init();
    crate::drivers::init();

    crate::arch::enable_interrupts();

    crate::process::creation::spawn(INIT_COMMAND, None, alloc::string::String::from("/"))
        .expect("failed to start init process");

    log::info!("pebble-kernel up, handing off to the scheduler");

    // The thread executing here (adopted by `sched::init()` as the initial
    // "boot" thread) has nothing left to do -- it idles until the timer
    // interrupt's epilogue preempts it in favor of whatever is ready.
    loop {
        crate::arch::x86_64::idle();
    }
}
