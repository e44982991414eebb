//! Priority-donating lock.
//!
//! A binary resource built on top of [`Semaphore`] that additionally tracks
//! its current holder. When a thread blocks trying to acquire a lock held by
//! a lower-priority thread, it donates its priority to the holder, and
//! transitively to whatever the holder is itself blocked on, so a
//! high-priority thread is never stuck behind a chain of lower-priority ones.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::sync::Arc;

use spin::Mutex as SpinMutex;

use super::semaphore::Semaphore;
use crate::irq;
use crate::sched::task::Thread;

pub struct Lock {
    sema: Semaphore,
    holder: SpinMutex<Option<Arc<Thread>>>,
}

impl Lock {
    pub const fn new() -> Self {
        Self {
            sema: Semaphore::new(1),
            holder: SpinMutex::new(None),
        }
    }

    pub fn holder(&self) -> Option<Arc<Thread>> {
        self.holder.lock().clone()
    }

    /// Acquire the lock, donating priority up the chain of locks if the
    /// current holder (or something it is itself waiting on) runs at a
    /// lower priority than the caller.
    pub fn acquire(self: &Arc<Self>) {
        let me = crate::sched::current();

        if let Some(held_by) = self.holder() {
            if !Arc::ptr_eq(&held_by, &me) {
                me.set_waiting_on(Some(self.clone()));
                donate_chain(&me, held_by);
            }
        }

        self.sema.down();

        let _guard = irq::disable();
        *self.holder.lock() = Some(me.clone());
        me.set_waiting_on(None);
    }

    pub fn try_acquire(self: &Arc<Self>) -> bool {
        if self.sema.try_down() {
            *self.holder.lock() = Some(crate::sched::current());
            true
        } else {
            false
        }
    }

    /// Release the lock, dropping any donations that were made on its
    /// account and waking the next waiter.
    pub fn release(self: &Arc<Self>) {
        let me = crate::sched::current();
        me.revoke_donors_of(self);
        *self.holder.lock() = None;
        self.sema.up();
    }

    pub fn is_held_by_current(self: &Arc<Self>) -> bool {
        self.holder().map(|h| h.tid == crate::sched::current().tid).unwrap_or(false)
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk `holder`, and whatever `holder` is itself blocked on, donating
/// priority along the way. Stops when a link in the chain is already at or
/// above the donor's priority, or the chain ends.
///
/// Each link's donor is the *immediate* predecessor in the chain (the thread
/// directly waiting on that link's lock), not the original top-level waiter.
/// That's what makes `waiting_on()` line up with the lock being released at
/// every depth: `holder`'s donor at this link is itself blocked with
/// `waiting_on() == Some(this link's lock)`, so `Thread::revoke_donors_of`
/// can find and drop it when that lock is released, however deep the chain.
fn donate_chain(waiter: &Arc<Thread>, mut holder: Arc<Thread>) {
    let mut donor = waiter.clone();
    loop {
        if holder.priority() >= donor.priority() {
            return;
        }
        holder.donate_from(donor.clone());
        match holder.waiting_on() {
            Some(next_lock) => match next_lock.holder() {
                Some(next_holder) if !Arc::ptr_eq(&next_holder, &holder) => {
                    donor = holder.clone();
                    holder = next_holder;
                }
                _ => return,
            },
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn uncontended_acquire_release() {
        let lock = Arc::new(Lock::new());
        lock.acquire();
        assert!(lock.is_held_by_current());
        lock.release();
        assert!(lock.holder().is_none());
    }

    /// Two-level donation chain: L(10) holds two locks, M(20) blocks on one,
    /// H(30) blocks on the other. L's effective priority must climb as each
    /// donor queues up and fall back one step at a time as each lock is
    /// released, never skipping straight to the base priority early.
    ///
    /// Exercises `donate_chain`/`revoke_donors_of` directly against
    /// hand-wired `Thread`/`Lock` state rather than through real blocking,
    /// since nothing here needs an actual context switch.
    #[test_case]
    fn two_level_donation_chain_unwinds_in_order() {
        use alloc::string::String;
        use crate::sched::task::{alloc_tid, Thread};

        let low = Thread::new(alloc_tid(), String::from("L"), 0, 0);
        let mid = Thread::new(alloc_tid(), String::from("M"), 0, 0);
        let high = Thread::new(alloc_tid(), String::from("H"), 0, 0);
        low.set_base_priority(10);
        mid.set_base_priority(20);
        high.set_base_priority(30);

        let l1 = Arc::new(Lock::new());
        let l2 = Arc::new(Lock::new());
        *l1.holder.lock() = Some(low.clone());
        *l2.holder.lock() = Some(low.clone());

        mid.set_waiting_on(Some(l1.clone()));
        donate_chain(&mid, low.clone());
        assert_eq!(low.priority(), 20);

        high.set_waiting_on(Some(l2.clone()));
        donate_chain(&high, low.clone());
        assert_eq!(low.priority(), 30);

        low.revoke_donors_of(&l2);
        assert_eq!(low.priority(), 20);

        low.revoke_donors_of(&l1);
        assert_eq!(low.priority(), 10);
    }
}
