//! Context switch latency, measured the only honest way: spawn two kernel
//! threads that do nothing but yield to each other and time how long a
//! fixed number of switches takes end to end.

#![no_std]
#![no_main]

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU64, Ordering};

use bootloader_api::config::Mapping;
use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

use pebble_kernel::test_framework::{cycles_to_ns, read_timestamp};
use pebble_kernel::{arch, exit_qemu, mm, sched, serial_println, QemuExitCode};

static CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &CONFIG);

const SWITCHES: u64 = 2000;

static COUNT: AtomicU64 = AtomicU64::new(0);
static START_TSC: AtomicU64 = AtomicU64::new(0);

extern "C" fn ping_pong() -> ! {
    loop {
        let n = COUNT.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= SWITCHES {
            let elapsed = read_timestamp().saturating_sub(START_TSC.load(Ordering::Relaxed));
            let avg_ns = cycles_to_ns(elapsed / SWITCHES);
            serial_println!("avg context switch: {} ns over {} switches", avg_ns, SWITCHES);
            exit_qemu(QemuExitCode::Success);
        }
        sched::yield_cpu();
    }
}

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    serial_println!("Context Switch Benchmark");
    serial_println!("========================");

    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");

    let mut regions = [(0u64, 0u64); 64];
    let mut count = 0;
    for region in boot_info.memory_regions.iter() {
        if region.kind == MemoryRegionKind::Usable && count < regions.len() {
            regions[count] = (region.start, region.end);
            count += 1;
        }
    }

    arch::init();
    mm::init(phys_mem_offset, &regions[..count]).expect("memory init failed");
    sched::init();

    sched::spawn("ping", ping_pong, sched::task::PRI_DEFAULT);
    sched::spawn("pong", ping_pong, sched::task::PRI_DEFAULT);

    arch::enable_interrupts();
    START_TSC.store(read_timestamp(), Ordering::Relaxed);

    loop {
        sched::yield_cpu();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("benchmark panic: {}", info);
    exit_qemu(QemuExitCode::Failed)
}
