//! Counting semaphore.
//!
//! The primitive every other synchronization type in this module is built
//! from. `down` blocks the calling thread until the count is positive, then
//! claims one unit; `up` releases one unit and wakes the highest-priority
//! waiter, if any.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::irq;
use crate::sched::task::Thread;

struct Inner {
    count: u64,
    waiters: Vec<Arc<Thread>>,
}

pub struct Semaphore {
    inner: Mutex<Inner>,
}

impl Semaphore {
    pub const fn new(count: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                count,
                waiters: Vec::new(),
            }),
        }
    }

    /// Block until the count is positive, then decrement it.
    pub fn down(&self) {
        loop {
            let _guard = irq::disable();
            let mut inner = self.inner.lock();
            if inner.count > 0 {
                inner.count -= 1;
                return;
            }
            let me = crate::sched::current();
            if !inner.waiters.iter().any(|t| Arc::ptr_eq(t, &me)) {
                inner.waiters.push(me);
            }
            drop(inner);
            crate::sched::block_current();
        }
    }

    /// Non-blocking down; returns `false` without decrementing if the
    /// count is currently zero.
    pub fn try_down(&self) -> bool {
        let _guard = irq::disable();
        let mut inner = self.inner.lock();
        if inner.count > 0 {
            inner.count -= 1;
            true
        } else {
            false
        }
    }

    /// Increment the count and wake the highest-priority waiter, if any.
    pub fn up(&self) {
        let _guard = irq::disable();
        let mut inner = self.inner.lock();
        inner.count += 1;
        if !inner.waiters.is_empty() {
            let idx = inner
                .waiters
                .iter()
                .enumerate()
                .max_by_key(|(_, t)| t.priority())
                .map(|(i, _)| i)
                .expect("waiters non-empty");
            let waiter = inner.waiters.remove(idx);
            crate::sched::unblock(waiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn try_down_respects_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }
}
