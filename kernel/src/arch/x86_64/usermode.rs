//! Ring 3 entry.
//!
//! [`enter_usermode`] builds an `iretq` frame and drops the CPU from Ring 0
//! to Ring 3. It never returns to its caller -- control only comes back to
//! the kernel later, through a syscall or interrupt gate, which lands on
//! whatever this thread's TSS RSP0 / per-CPU kernel stack was set to.
//!
//! Every user thread's [`crate::sched::task::Thread::context`] rip points at
//! [`user_entry_trampoline`], a small kernel function that reads the
//! thread's [`UserFrame`](crate::sched::task::UserFrame) and calls
//! `enter_usermode`. The ordinary `ret`-based kernel context switch lands
//! here in Ring 0 on the thread's own kernel stack (with CR3 already
//! switched, since `context_switch` loads it from the saved context before
//! `ret`ing) the first time the thread runs; `enter_usermode` takes it the
//! rest of the way into Ring 3.

use core::arch::asm;

use crate::sched::task::UserFrame;

/// Push the iretq frame and transition to Ring 3.
///
/// # Safety
/// - `frame.rip` must be a mapped, user-executable address in the
///   currently active address space.
/// - `frame.rsp` must be a mapped, user-writable stack address.
/// - CR3 must already hold the target process's page tables.
/// - The TSS RSP0 (or, for the syscall path, the per-CPU kernel stack slot)
///   must already point at this thread's kernel stack, or the first trap
///   back into the kernel will run on a stale stack.
pub unsafe fn enter_usermode(frame: &UserFrame, user_cs: u16, user_ss: u16) -> ! {
    let user_cs = user_cs as u64;
    let user_ss = user_ss as u64;
    // SAFETY: frame contents and segment selectors are the caller's
    // responsibility per the function's safety doc; the asm only moves
    // them into registers and onto the stack in the layout `iretq` expects.
    asm!(
        "mov ds, {ss:r}",
        "mov es, {ss:r}",
        "mov fs, {zero:x}",
        "mov gs, {zero:x}",
        "push {ss}",       // SS
        "push {rsp}",      // RSP
        "push {rflags}",   // RFLAGS
        "push {cs}",       // CS
        "push {rip}",      // RIP
        "mov rax, {rax}",
        "mov rdi, {rdi}",
        "mov rsi, {rsi}",
        "iretq",
        ss = in(reg) user_ss,
        rsp = in(reg) frame.rsp,
        rflags = in(reg) frame.rflags,
        cs = in(reg) user_cs,
        rip = in(reg) frame.rip,
        rax = in(reg) frame.rax,
        rdi = in(reg) frame.rdi,
        rsi = in(reg) frame.rsi,
        zero = in(reg) 0u64,
        options(noreturn)
    );
}

/// Entry function for every freshly created user thread.
///
/// Reads the frame its creator stashed in [`UserState::frame`] and jumps to
/// Ring 3. Never returns.
///
/// [`UserState::frame`]: crate::sched::task::UserState::frame
pub extern "C" fn user_entry_trampoline() -> ! {
    let me = crate::sched::current();
    let frame = {
        let user = me.user.as_ref().expect("user_entry_trampoline on a kernel thread");
        user.lock().frame
    };
    let selectors = crate::arch::x86_64::gdt::selectors();
    // SAFETY: the thread's address space was activated via the saved
    // context's CR3 by the context switch that got us here; the creator
    // (process::creation / process::fork) populated `frame` with a mapped
    // entry point and stack before publishing this thread.
    unsafe {
        enter_usermode(&frame, selectors.user_code_selector.0, selectors.user_data_selector.0);
    }
}
