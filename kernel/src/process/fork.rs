//! `fork`: synchronously duplicate the calling process into a new thread.
//!
//! The child's address space and file table are copied by the parent before
//! the child is ever published to the ready queue, so there is no window
//! where the child could run with a half-copied address space -- no
//! "fork_done" handshake is needed between the two threads.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::sync::Arc;

use crate::error::KernelError;
use crate::sched::task::{Thread, UserFrame, UserState};

/// Duplicate `parent` into a new thread that resumes at `resume_frame` with
/// its return value (`rax`) forced to zero, and register/publish it.
///
/// `resume_frame` is the parent's live in-syscall register state -- the
/// child must resume exactly where the parent's `fork()` call site left off,
/// not at the entry trampoline.
pub fn fork(parent: &Arc<Thread>, resume_frame: UserFrame) -> Result<u64, KernelError> {
    let parent_user_lock = parent
        .user
        .as_ref()
        .ok_or(KernelError::InvalidState { expected: "user process", actual: "kernel thread" })?;
    let mut parent_user = parent_user_lock.lock();

    let mut child_vas = crate::mm::vas::VirtualAddressSpace::new();
    child_vas.init()?;
    {
        let parent_vas = parent_user.vas.lock();
        child_vas.clone_from(&parent_vas)?;
    }
    let child_root = child_vas.get_page_table();

    let child_fd_table = parent_user.fd_table.clone_for_fork();

    let mut child_frame = resume_frame;
    child_frame.rax = 0;

    let mut child_user = UserState::new(child_vas, Some(parent.tid), parent_user.cwd.clone());
    child_user.fd_table = child_fd_table;
    child_user.frame = child_frame;

    let child = crate::sched::new_user_thread(&parent.name);
    let child_tid = child.tid;
    // SAFETY: `child` was just built and has not been published.
    unsafe { child.set_context_cr3(child_root) };
    let child = child.with_user(child_user);

    parent_user.children.push(child_tid);
    drop(parent_user);

    super::table::register(child.clone());
    crate::sched::publish(child);

    Ok(child_tid)
}
