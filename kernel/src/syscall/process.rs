//! `halt`, `exit`, `fork`, `exec`, `wait`.

use super::uaccess::user_str;
use crate::arch::x86_64::syscall::{current_user_frame, set_resume_frame};
use crate::process::{creation, exit, fork};
use crate::sched::task::UserFrame;

/// Power off. A teaching kernel has nowhere else to go, so this parks the
/// CPU forever rather than actually leaving protected mode.
pub fn sys_halt() -> isize {
    crate::println!("[SYSCALL] halt");
    crate::arch::halt()
}

/// Terminate the calling thread. Never returns.
pub fn sys_exit(status: i32) -> isize {
    let me = crate::sched::current();
    exit::exit(&me, status)
}

/// Duplicate the calling thread. Returns the child's tid to the parent
/// (already delivered as 0 to the child, via its own saved [`UserFrame`]).
pub fn sys_fork() -> isize {
    let me = crate::sched::current();
    let (rip, rsp, rflags) = current_user_frame();
    let resume = UserFrame { rip, rsp, rflags, rax: 0, rdi: 0, rsi: 0 };

    match fork::fork(&me, resume) {
        Ok(child_tid) => child_tid as isize,
        Err(_) => -1,
    }
}

/// Replace the calling process's own address space with `cmd_line`'s
/// program, in place. Real Pintos semantics: on success this never returns
/// to the caller -- the syscall return lands directly in the new program's
/// entry point, with the old address space already gone -- and on failure
/// the caller is untouched and gets -1 back as an ordinary return value.
pub fn sys_exec(cmd_line_ptr: usize) -> isize {
    let me = crate::sched::current();
    let Ok(cmd_line) = user_str(cmd_line_ptr, 4096) else {
        return -1;
    };

    match creation::exec_in_place(&me, &cmd_line) {
        Ok(frame) => {
            set_resume_frame(frame.rip, frame.rsp, frame.rflags, frame.rdi, frame.rsi);
            // The value loaded into RAX here is never observed: `frame.rip`
            // overrides where the syscall returns to, so this return value
            // reaches nobody.
            0
        }
        Err(_) => -1,
    }
}

/// Block until child `tid` exits, then reap it and return its status.
pub fn sys_wait(tid: u64) -> isize {
    let me = crate::sched::current();
    match exit::wait(&me, tid) {
        Ok(status) => status as isize,
        Err(_) => -1,
    }
}
