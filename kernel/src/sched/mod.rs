//! Preemptive priority scheduler.
//!
//! A single ready thread runs at a time. Everything else is either waiting
//! on the [`queue::READY_QUEUE`] ordered by effective priority, blocked on a
//! synchronization primitive, or parked in [`queue::SLEEP_QUEUE`] until a
//! tick deadline. [`scheduler`] owns the mechanics of switching; this module
//! is the policy other subsystems call into.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::sync::Arc;

pub mod queue;
pub mod scheduler;
pub mod task;

pub use task::{Thread, ThreadState, Tid};

/// Bring up the scheduler. Must run once, after the heap and GDT/TSS exist,
/// before interrupts are enabled.
pub fn init() {
    log::info!("sched::init starting");
    scheduler::init();
    println!("[SCHED] scheduler initialized");
    log::info!("sched::init complete");
}

/// Spawn a new kernel thread at `priority` and place it on the ready queue,
/// then give it the CPU right away if it outranks the caller -- the new
/// thread should run (or block) before this call returns, not wait for the
/// next tick.
pub fn spawn(name: &str, entry: extern "C" fn() -> !, priority: u8) -> Arc<Thread> {
    let thread = scheduler::spawn(name, entry, priority);
    maybe_preempt(priority);
    thread
}

/// Build a not-yet-scheduled thread whose entry is the Ring 3 trampoline.
/// See [`scheduler::new_user_thread`].
pub fn new_user_thread(name: &str) -> Arc<Thread> {
    scheduler::new_user_thread(name)
}

/// Publish a thread built with [`new_user_thread`] to the ready queue.
pub fn publish(thread: Arc<Thread>) {
    scheduler::publish(thread)
}

/// The thread presently executing on this CPU.
pub fn current() -> Arc<Thread> {
    scheduler::current()
}

/// Give up the CPU voluntarily. The caller stays Ready and goes back on the
/// ready queue behind any peer at the same priority.
pub fn yield_cpu() {
    let _guard = crate::irq::disable();
    scheduler::reschedule(true);
}

/// Block the calling thread. The caller must already have recorded itself
/// on whatever wait list will wake it (a semaphore's waiter list, the sleep
/// queue, ...) before calling this -- once this returns control to someone
/// else, nothing else will schedule this thread back in.
pub fn block_current() {
    let _guard = crate::irq::disable();
    scheduler::current().set_state(ThreadState::Blocked);
    scheduler::reschedule(false);
}

/// Terminate the calling thread for good. The caller must have already set
/// its own state to [`ThreadState::Dying`] and recorded anything a waiter
/// needs (exit status, the `exited` semaphore) -- once this returns control
/// to someone else, nothing will ever schedule this thread back in, and its
/// `Arc` survives only as long as [`crate::process::table`] still holds it.
pub fn exit_current() -> ! {
    let _guard = crate::irq::disable();
    scheduler::reschedule(false);
    unreachable!("a Dying thread was scheduled back in")
}

/// Move a blocked thread back onto the ready queue, then give a
/// higher-priority thread the CPU promptly rather than leaving it to the
/// next timer tick.
pub fn unblock(thread: Arc<Thread>) {
    let _guard = crate::irq::disable();
    thread.set_state(ThreadState::Ready);
    let woken_priority = thread.priority();
    queue::READY_QUEUE.lock().push(thread);
    drop(_guard);
    maybe_preempt(woken_priority);
}

/// Called whenever a thread becomes ready outside the timer tick (waking
/// from a semaphore, a lock release, a condvar signal): if it outranks
/// whatever is running now, preempt. Inside an interrupt handler that means
/// arming the same deferred yield the tick handler uses -- switching stacks
/// before the handler has sent EOI or unwound its frame would be wrong --
/// everywhere else it means yielding right now.
fn maybe_preempt(woken_priority: u8) {
    let cur = scheduler::current();
    if scheduler::is_idle(&cur) || woken_priority > cur.priority() {
        if crate::irq::in_interrupt() {
            crate::irq::request_yield_on_return();
        } else {
            yield_cpu();
        }
    }
}

/// Park the calling thread on the sleep queue until tick `wake_at`.
pub fn sleep_current_until(wake_at: i64) {
    let _guard = crate::irq::disable();
    let me = scheduler::current();
    me.set_wake_tick(wake_at);
    me.set_state(ThreadState::Blocked);
    queue::SLEEP_QUEUE.lock().insert(me);
    scheduler::reschedule(false);
}

/// Called once per timer tick, after [`crate::timer::tick`] has already
/// woken any due sleepers. Decides whether the current thread's slice is up
/// or a higher-priority thread just became ready, and if so arms a
/// deferred yield for the interrupt epilogue to act on.
pub fn on_tick(_now: u64) {
    let cur = scheduler::current();
    if scheduler::is_idle(&cur) {
        if !queue::READY_QUEUE.lock().is_empty() {
            crate::irq::request_yield_on_return();
        }
        return;
    }

    let ticks = scheduler::bump_cpu_ticks();
    let should_yield = match queue::READY_QUEUE.lock().highest_priority() {
        Some(p) if p > cur.priority() => true,
        Some(_) => ticks >= scheduler::TIME_SLICE,
        None => false,
    };
    if should_yield {
        crate::irq::request_yield_on_return();
    }
}

/// Reschedule from the timer interrupt epilogue. Interrupts are already
/// disabled (the CPU clears IF on gate entry and the epilogue hasn't run
/// `iretq` yet), so this skips straight to the mechanics.
pub fn yield_from_interrupt() {
    scheduler::reschedule(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    #[test_case]
    fn block_and_unblock_round_trips_state() {
        // unblock() now checks the current thread's priority to decide
        // whether to preempt, so a current thread has to exist.
        scheduler::init();
        let t = Thread::new(task::alloc_tid(), String::from("t"), 0, 0);
        t.set_state(ThreadState::Blocked);
        assert_eq!(t.state(), ThreadState::Blocked);
        unblock(t.clone());
        assert_eq!(t.state(), ThreadState::Ready);
    }
}
