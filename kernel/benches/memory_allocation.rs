//! Heap allocation throughput, end to end through the real boot path:
//! `arch::init` then `mm::init` bring up the slab allocator backing
//! `#[global_allocator]`, then a handful of allocation sizes are timed
//! through [`pebble_kernel::test_framework::BenchmarkRunner`].

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use alloc::vec::Vec;
use bootloader_api::config::Mapping;
use bootloader_api::info::MemoryRegionKind;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

use pebble_kernel::test_framework::BenchmarkRunner;
use pebble_kernel::{arch, exit_qemu, mm, serial_println, QemuExitCode};

static CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    serial_println!("Memory Allocation Benchmark");
    serial_println!("===========================");

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

    let runner = BenchmarkRunner::new();
    runner.run_benchmark("small alloc (64B)", || {
        let v: Vec<u8> = Vec::with_capacity(64);
        core::hint::black_box(&v);
    });
    runner.run_benchmark("medium alloc (4KiB)", || {
        let v: Vec<u8> = Vec::with_capacity(4096);
        core::hint::black_box(&v);
    });
    runner.run_benchmark("large alloc (64KiB)", || {
        let v: Vec<u8> = Vec::with_capacity(65536);
        core::hint::black_box(&v);
    });
    runner.run_benchmark("alloc + drop (64B)", || {
        let v: Vec<u8> = Vec::with_capacity(64);
        drop(v);
    });

    exit_qemu(QemuExitCode::Success);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("benchmark panic: {}", info);
    exit_qemu(QemuExitCode::Failed)
}
