//! x86_64 SYSCALL/SYSRET entry point.
//!
//! The CPU does none of the bookkeeping an interrupt gate does on `syscall`
//! -- no automatic stack switch, no pushed frame. `syscall_entry` does that
//! by hand: swap to the kernel GS base, swap RSP onto this thread's kernel
//! stack, save the handful of registers the System V ABI doesn't treat as
//! caller-saved, and reshuffle arguments into the calling convention
//! `syscall::syscall_handler` expects.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::syscall::syscall_handler;

/// Per-CPU scratch the syscall trampoline reads and writes with plain `mov`,
/// addressed through `gs:[..]` after `swapgs`. A single instance: this
/// kernel only ever runs one CPU.
#[repr(C)]
struct CpuData {
    /// Top of the current thread's kernel stack; loaded into RSP on entry.
    kernel_rsp: AtomicU64,
    /// User RSP at the moment of the `syscall` instruction, saved here
    /// because `syscall` doesn't touch the stack itself. Re-read (not
    /// popped off the kernel stack) right before `sysretq`, so a handler
    /// that overwrites it -- `exec` replacing the caller's own stack --
    /// takes effect on return.
    user_rsp: AtomicU64,
    /// User RIP (the return address `syscall` left in RCX). Re-read before
    /// `sysretq` for the same reason: `exec` overwrites this with the new
    /// program's entry point so the syscall never returns to the old one.
    user_rip: AtomicU64,
    /// User RFLAGS (left in R11 by `syscall`). Re-read before `sysretq`.
    user_rflags: AtomicU64,
    /// RDI to load before `sysretq`. Zero for an ordinary syscall return;
    /// `exec` sets this to the new process's argc.
    resume_rdi: AtomicU64,
    /// RSI to load before `sysretq`; `exec` sets this to the new process's
    /// argv base.
    resume_rsi: AtomicU64,
}

impl CpuData {
    const fn new() -> Self {
        Self {
            kernel_rsp: AtomicU64::new(0),
            user_rsp: AtomicU64::new(0),
            user_rip: AtomicU64::new(0),
            user_rflags: AtomicU64::new(0),
            resume_rdi: AtomicU64::new(0),
            resume_rsi: AtomicU64::new(0),
        }
    }
}

static CPU_DATA: CpuData = CpuData::new();

/// Point `gs:[0x0]`/`gs:[0x8]`/`gs:[0x10]`/`gs:[0x18]` (as read by
/// `syscall_entry`) at [`CPU_DATA`] by loading `KERNEL_GS_BASE` -- `swapgs`
/// exchanges it with `GS_BASE` on every entry/exit, so user code's own GS
/// is left untouched.
fn install_cpu_data() {
    use x86_64::registers::model_specific::KernelGsBase;
    use x86_64::VirtAddr;

    KernelGsBase::write(VirtAddr::new(&raw const CPU_DATA as u64));
}

/// Install this thread's kernel stack top as the target of the next
/// `syscall` entry. Called by the scheduler on every context switch,
/// alongside [`super::gdt::set_kernel_stack`] (which serves the same
/// purpose for interrupt gates).
pub fn set_kernel_stack(top: u64) {
    CPU_DATA.kernel_rsp.store(top, Ordering::Relaxed);
}

/// The user RIP/RSP/RFLAGS captured by the most recent `syscall` entry on
/// this CPU. Valid to read from within a syscall handler before it returns
/// -- `fork` uses this to give the child a resume point identical to the
/// parent's.
pub fn current_user_frame() -> (u64, u64, u64) {
    (
        CPU_DATA.user_rip.load(Ordering::Relaxed),
        CPU_DATA.user_rsp.load(Ordering::Relaxed),
        CPU_DATA.user_rflags.load(Ordering::Relaxed),
    )
}

/// Redirect the in-flight syscall's return straight into a freshly loaded
/// program instead of back to the caller -- `sys_exec`'s success path.
/// `syscall_entry` re-reads RIP/RSP/RFLAGS/RDI/RSI from here immediately
/// before `sysretq`, so this takes effect without the handler itself ever
/// touching the CPU's actual register state.
pub fn set_resume_frame(rip: u64, rsp: u64, rflags: u64, rdi: u64, rsi: u64) {
    CPU_DATA.user_rip.store(rip, Ordering::Relaxed);
    CPU_DATA.user_rsp.store(rsp, Ordering::Relaxed);
    CPU_DATA.user_rflags.store(rflags, Ordering::Relaxed);
    CPU_DATA.resume_rdi.store(rdi, Ordering::Relaxed);
    CPU_DATA.resume_rsi.store(rsi, Ordering::Relaxed);
}

/// x86_64 `SYSCALL` instruction entry point.
///
/// On entry: RCX = user RIP, R11 = user RFLAGS, RAX = syscall number,
/// RDI/RSI/RDX/R10/R8/R9 = syscall args 1..6 (R10 stands in for RCX, which
/// the CPU clobbers). `syscall_handler` takes `(num, a1, a2, a3)` -- every
/// syscall this kernel defines takes at most three arguments.
///
/// # Safety
/// Only ever reached via the `syscall` instruction; relies on `LStar`
/// pointing here and `Star` holding the matching segment selectors (see
/// [`init_syscall`]).
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "swapgs",
        "mov gs:[0x8], rsp",          // user_rsp
        "mov rsp, gs:[0x0]",          // kernel_rsp
        "mov gs:[0x10], rcx",         // user_rip
        "mov gs:[0x18], r11",         // user_rflags
        "mov qword ptr gs:[0x20], 0", // resume_rdi defaults to 0
        "mov qword ptr gs:[0x28], 0", // resume_rsi defaults to 0

        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        // Reshuffle (rax=num, rdi=a1, rsi=a2, rdx=a3) into the 4-argument
        // extern "C" call the handler expects: (num, a1, a2, a3).
        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",
        "call {handler}",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",

        // Re-read rather than pop: an ordinary syscall leaves these exactly
        // as they were saved on entry, but `sys_exec`'s success path
        // overwrites them via `set_resume_frame` so this return lands in
        // the new program instead of back in the caller.
        "mov rcx, gs:[0x10]",         // user_rip
        "mov r11, gs:[0x18]",         // user_rflags
        "mov rdi, gs:[0x20]",         // resume_rdi
        "mov rsi, gs:[0x28]",         // resume_rsi
        "mov rsp, gs:[0x8]",          // user_rsp
        "swapgs",
        "sysretq",

        handler = sym syscall_handler,
    );
}

/// Enable `SYSCALL`/`SYSRET` and point it at [`syscall_entry`].
pub fn init_syscall() {
    use x86_64::registers::model_specific::{Efer, EferFlags, LStar, Star};

    install_cpu_data();

    // SAFETY: run once during boot, before any user thread exists to race
    // the MSR writes.
    unsafe {
        Efer::update(|flags| {
            flags.insert(EferFlags::SYSTEM_CALL_EXTENSIONS);
        });
        LStar::write(x86_64::VirtAddr::new(syscall_entry as usize as u64));
        let selectors = super::gdt::selectors();
        Star::write(
            selectors.user_code_selector,
            selectors.user_data_selector,
            selectors.code_selector,
            selectors.data_selector,
        )
        .expect("STAR selector layout must satisfy SYSRET's CS/SS+8 invariant");
    }
}
