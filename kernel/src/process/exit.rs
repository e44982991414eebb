//! `exit` and `wait`.
//!
//! A process has no separate zombie state: exiting a thread tears down its
//! address space immediately and leaves only its exit status and `exited`
//! semaphore behind in [`UserState`], reachable through [`super::table`]
//! until its parent reaps it with `wait`.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::sync::Arc;

use crate::error::KernelError;
use crate::sched::task::{Thread, ThreadState, Tid};

/// Tear down `thread`'s address space and open files, record `status`, and
/// wake anyone blocked in `wait()` for it. Never returns -- the caller is
/// expected to be the thread exiting itself, from inside the `exit` syscall
/// handler.
pub fn exit(thread: &Arc<Thread>, status: i32) -> ! {
    let exited = {
        let user_lock = thread.user.as_ref().expect("exit() called on a kernel thread");
        let mut user = user_lock.lock();
        user.exit_status = status;
        user.fd_table.close_all();
        {
            let mut vas = user.vas.lock();
            vas.destroy();
        }
        user.exited.clone()
    };

    thread.set_state(ThreadState::Dying);
    exited.up();

    crate::sched::exit_current()
}

/// Block the calling thread until child `tid` exits, then reap it and
/// return its status. If `tid` is not one of the caller's live children,
/// returns [`KernelError::ProcessNotFound`].
pub fn wait(parent: &Arc<Thread>, tid: Tid) -> Result<i32, KernelError> {
    {
        let parent_user = parent.user.as_ref().expect("wait() called on a kernel thread").lock();
        if !parent_user.children.contains(&tid) {
            return Err(KernelError::ProcessNotFound { pid: tid });
        }
    }

    let child = super::table::get(tid).ok_or(KernelError::ProcessNotFound { pid: tid })?;
    let exited = {
        let child_user = child.user.as_ref().expect("child tid is not a user process").lock();
        child_user.exited.clone()
    };
    exited.down();

    let status = {
        let child_user = child.user.as_ref().unwrap().lock();
        child_user.exit_status
    };

    {
        let mut parent_user = parent.user.as_ref().unwrap().lock();
        parent_user.children.retain(|&c| c != tid);
    }
    super::table::remove(tid);

    Ok(status)
}
