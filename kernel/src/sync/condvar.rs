//! Condition variable.
//!
//! Always used together with a [`Lock`]: `wait` atomically releases the lock
//! and blocks the caller, re-acquiring it before returning. Each waiter gets
//! its own private one-slot semaphore, so `signal` can wake exactly one
//! thread without the thundering-herd re-check `broadcast` would otherwise
//! need.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use super::{lock::Lock, semaphore::Semaphore};
use crate::sched::task::Thread;

struct Waiter {
    sema: Arc<Semaphore>,
    /// The waiting thread itself, not its priority at queueing time --
    /// donation can raise or a later `set_base_priority` can lower a
    /// waiter's priority while it sits here, and `signal`/`broadcast` must
    /// see the current value, not a stale snapshot.
    thread: Arc<Thread>,
}

pub struct CondVar {
    waiters: Mutex<Vec<Waiter>>,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Release `lock`, block until signaled, then re-acquire `lock`.
    ///
    /// `lock` must be held by the caller on entry and is held again on
    /// return, even if this function is interrupted by a spurious wakeup
    /// (it is not: every wakeup here is a deliberate `signal`/`broadcast`).
    pub fn wait(&self, lock: &Arc<Lock>) {
        let sema = Arc::new(Semaphore::new(0));
        let thread = crate::sched::current();
        self.waiters.lock().push(Waiter {
            sema: sema.clone(),
            thread,
        });

        lock.release();
        sema.down();
        lock.acquire();
    }

    /// Wake the waiter with the highest *current* priority, re-read at the
    /// moment of the call so a donation or priority change after `wait()`
    /// queued the thread is reflected, not whatever it was back then.
    pub fn signal(&self) {
        let mut waiters = self.waiters.lock();
        if waiters.is_empty() {
            return;
        }
        let idx = waiters
            .iter()
            .enumerate()
            .max_by_key(|(_, w)| w.thread.priority())
            .map(|(i, _)| i)
            .expect("waiters non-empty");
        let waiter = waiters.remove(idx);
        waiter.sema.up();
    }

    /// Wake every waiting thread.
    pub fn broadcast(&self) {
        let mut waiters = self.waiters.lock();
        for waiter in waiters.drain(..) {
            waiter.sema.up();
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
