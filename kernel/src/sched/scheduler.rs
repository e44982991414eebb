//! Context-switch mechanics: the idle thread, the currently running
//! thread, and the raw register swap. Everything that decides *whether* to
//! switch lives one level up in [`super`]; this module only knows *how*.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::{boxed::Box, string::String, sync::Arc, vec};
use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::queue::READY_QUEUE;
use super::task::{alloc_tid, Thread, ThreadState};
use crate::arch::x86_64::{context::switch_context, gdt};
use crate::sync::once_lock::GlobalState;

/// Ticks a thread gets before a peer at the same priority preempts it.
pub const TIME_SLICE: u64 = 4;

const KERNEL_STACK_SIZE: usize = 16 * 1024;

static CURRENT: Mutex<Option<Arc<Thread>>> = Mutex::new(None);
static IDLE: GlobalState<Arc<Thread>> = GlobalState::new();
static TICKS_ON_CPU: AtomicU64 = AtomicU64::new(0);

/// A dying thread's kernel stack, parked here by the `reschedule` call that
/// switches away from it for the last time. A thread can't free its own
/// stack while still running on it, so the free is deferred to whichever
/// thread calls `reschedule` next -- it reclaims this at the very start of
/// its own call, before anything else runs.
static PENDING_STACK_FREE: Mutex<Option<(usize, usize)>> = Mutex::new(None);

extern "C" fn idle_loop() -> ! {
    loop {
        crate::arch::x86_64::idle();
    }
}

fn new_kernel_thread(name: String, entry: usize) -> Arc<Thread> {
    let stack = vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
    // Leaked here; reclaimed by `reclaim_pending_stack` once this thread
    // exits and some other thread's `reschedule` call runs after it.
    let stack: &'static mut [u8] = Box::leak(stack);
    let stack_top = stack.as_ptr() as usize + stack.len();
    Thread::new(alloc_tid(), name, entry, stack_top)
}

/// Free whatever kernel stack was parked by the previous `reschedule` call,
/// if any. Must run before anything else touches the ready queue so a
/// thread's stack never outlives it by more than one schedule.
fn reclaim_pending_stack() {
    if let Some((base, len)) = PENDING_STACK_FREE.lock().take() {
        // SAFETY: `(base, len)` was produced by `Box::leak` on a `Box<[u8]>`
        // of exactly this length in `new_kernel_thread`, and was parked here
        // only after its owning thread reached `ThreadState::Dying` and is
        // never scheduled again, so nothing else can be holding a reference
        // into this memory.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(base as *mut u8, len)));
        }
    }
}

/// Bring up the scheduler. Must run once, after the heap and the TSS exist,
/// before interrupts are enabled.
pub fn init() {
    let idle = new_kernel_thread(String::from("idle"), idle_loop as usize);
    // The idle thread never sits on the ready queue; `pick_next` falls back
    // to it directly when the queue is empty.
    IDLE.init(idle).ok();

    // Adopt whatever stack booted the kernel as the first running thread.
    // Its saved context is never read before the first switch overwrites it
    // with real register values.
    let boot = Thread::new(alloc_tid(), String::from("boot"), 0, 0);
    boot.set_state(ThreadState::Running);
    *CURRENT.lock() = Some(boot);
}

/// Create a new kernel thread at `priority` and place it on the ready queue.
pub fn spawn(name: &str, entry: extern "C" fn() -> !, priority: u8) -> Arc<Thread> {
    let thread = new_kernel_thread(String::from(name), entry as usize);
    thread.set_base_priority(priority);
    READY_QUEUE.lock().push(thread.clone());
    thread
}

/// Build a thread whose kernel-mode entry is the Ring 3 trampoline, but do
/// not publish it yet -- the caller still needs to attach a `UserState`,
/// fill in its `frame`, and point its context's CR3 at the right address
/// space before anything may schedule it.
pub fn new_user_thread(name: &str) -> Arc<Thread> {
    new_kernel_thread(
        String::from(name),
        crate::arch::x86_64::usermode::user_entry_trampoline as usize,
    )
}

/// Place a freshly built thread on the ready queue. Call only once its
/// `UserState` (if any) is fully populated.
pub fn publish(thread: Arc<Thread>) {
    READY_QUEUE.lock().push(thread);
}

/// The thread presently executing on this CPU.
pub fn current() -> Arc<Thread> {
    CURRENT
        .lock()
        .clone()
        .expect("sched::current() called before sched::init()")
}

pub fn idle() -> Arc<Thread> {
    IDLE.with(Arc::clone).expect("idle thread not initialized")
}

pub fn is_idle(thread: &Arc<Thread>) -> bool {
    IDLE.with(|t| Arc::ptr_eq(t, thread)).unwrap_or(false)
}

/// Ticks the current thread has held the CPU this run; reset on every
/// switch. Used by [`super::on_tick`] to enforce the round-robin slice.
pub fn bump_cpu_ticks() -> u64 {
    TICKS_ON_CPU.fetch_add(1, Ordering::Relaxed) + 1
}

fn pick_next() -> Arc<Thread> {
    READY_QUEUE.lock().pop_highest().unwrap_or_else(idle)
}

/// Requeue the current thread as Ready (unless it's the idle thread or
/// `requeue_prev` is false, e.g. it just blocked), then switch to whatever
/// is picked next. Must run with interrupts disabled.
pub fn reschedule(requeue_prev: bool) {
    reclaim_pending_stack();

    let prev = current();
    if requeue_prev && !is_idle(&prev) {
        prev.set_state(ThreadState::Ready);
        READY_QUEUE.lock().push(prev.clone());
    } else if prev.state() == ThreadState::Dying && prev.kernel_stack_top != 0 {
        // Boot thread (kernel_stack_top == 0) adopted its stack rather than
        // having one allocated for it here, and never exits anyway.
        let base = prev.kernel_stack_top as usize - KERNEL_STACK_SIZE;
        *PENDING_STACK_FREE.lock() = Some((base, KERNEL_STACK_SIZE));
    }
    let next = pick_next();
    switch_to(prev, next);
}

fn switch_to(prev: Arc<Thread>, next: Arc<Thread>) {
    if Arc::ptr_eq(&prev, &next) {
        next.set_state(ThreadState::Running);
        return;
    }

    next.set_state(ThreadState::Running);
    *CURRENT.lock() = Some(next.clone());
    gdt::set_kernel_stack(next.kernel_stack_top);
    crate::arch::x86_64::syscall::set_kernel_stack(next.kernel_stack_top);
    TICKS_ON_CPU.store(0, Ordering::Relaxed);

    prev.check_canary();
    next.check_canary();

    // SAFETY: `prev` is the thread executing this function, so its context
    // is exclusively ours to save into; `next` was just taken off the ready
    // queue (or is the idle thread) and cannot be running anywhere else --
    // this kernel never runs more than one CPU. `CURRENT` was updated above
    // before the switch so an interrupt that fires mid-switch (once `next`
    // is live) sees the right thread.
    unsafe {
        let prev_ctx = &mut *prev.context.get();
        let next_ctx = &*next.context.get();
        switch_context(prev_ctx, next_ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn idle_is_not_itself() {
        init();
        let idle_thread = idle();
        assert!(!Arc::ptr_eq(&idle_thread, &current()));
        assert!(is_idle(&idle_thread));
    }
}
