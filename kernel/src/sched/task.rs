//! Thread control block.
//!
//! A `Thread` is the kernel's only unit of scheduling and execution; there is
//! no separate process object. User processes are threads with `user: Some`.
//! One page's worth of metadata backs each thread; the kernel stack for a
//! thread grows down from the top of that same allocation in a real Pintos
//! build. Here the stack is a separate heap allocation, but the control block
//! still carries a canary pair that is checked at every scheduling boundary.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::{string::String, sync::Arc, vec::Vec};
use core::cell::UnsafeCell;

use spin::Mutex;

use crate::arch::x86_64::context::X86_64Context;
use crate::fs::file::FileTable;
use crate::mm::vas::VirtualAddressSpace;
use crate::sync::{lock::Lock, semaphore::Semaphore};

/// Thread identifier, monotonically increasing.
pub type Tid = u64;

pub const PRI_MIN: u8 = 0;
pub const PRI_DEFAULT: u8 = 31;
pub const PRI_MAX: u8 = 63;

/// Sentinel written at control-block boundaries and checked at every
/// scheduling decision to catch kernel-stack overflow.
const STACK_CANARY: u64 = 0x5441_4c49_4e45_5321;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Blocked,
    Dying,
}

/// The Ring 3 register state a user thread resumes at the first time it is
/// scheduled. Filled in once, before the thread is published to the ready
/// queue, by whatever created it (a fresh `exec` or a `fork` duplicating the
/// parent's in-flight syscall frame), then consumed exactly once by
/// [`crate::arch::x86_64::usermode::user_entry_trampoline`].
#[derive(Debug, Clone, Copy)]
pub struct UserFrame {
    pub rip: u64,
    pub rsp: u64,
    pub rflags: u64,
    /// Loaded into RAX before the `iretq`. A fresh process never reads RAX on
    /// entry; a forked child reads it as `fork`'s return value, which must be
    /// zero.
    pub rax: u64,
    /// Loaded into RDI. A fresh process reads this as argc.
    pub rdi: u64,
    /// Loaded into RSI. A fresh process reads this as the argv base.
    pub rsi: u64,
}

impl UserFrame {
    pub const fn zeroed() -> Self {
        Self { rip: 0, rsp: 0, rflags: 0x202, rax: 0, rdi: 0, rsi: 0 }
    }
}

/// Extensions present only on threads that back a user process.
pub struct UserState {
    /// The address space backing this process. Held behind its own lock
    /// (distinct from the one guarding the rest of `UserState`) so `fork`
    /// can clone it, and `exit` can tear it down, independently of whatever
    /// else is touching this thread's bookkeeping.
    pub vas: Mutex<VirtualAddressSpace>,
    /// Cached copy of `vas.get_page_table()`, kept in step with `vas` so
    /// callers can read a thread's address space root without taking the
    /// `vas` lock. `exec` updates both together when it replaces a thread's
    /// address space in place.
    pub page_table_root: u64,
    pub children: Vec<Tid>,
    pub parent: Option<Tid>,
    pub fd_table: FileTable,
    pub exit_status: i32,
    pub cwd: String,
    /// Raised by this thread when it exits; `wait()` downs it. Wrapped in
    /// `Arc` so a waiting parent can clone it out from under the rest of
    /// `UserState` before blocking -- otherwise the parent would hold this
    /// struct's outer lock while blocked, and the exiting child would
    /// deadlock trying to take the same lock to raise it.
    pub exited: Arc<Semaphore>,
    /// Ring 3 state this thread resumes at on its first scheduling. Read
    /// once by the entry trampoline and never touched again; the thread's
    /// own saved `context` and trap frames take over from there.
    pub frame: UserFrame,
}

impl UserState {
    pub fn new(vas: VirtualAddressSpace, parent: Option<Tid>, cwd: String) -> Self {
        let page_table_root = vas.get_page_table();
        Self {
            vas: Mutex::new(vas),
            page_table_root,
            children: Vec::new(),
            parent,
            fd_table: FileTable::new(),
            exit_status: 0,
            cwd,
            exited: Arc::new(Semaphore::new(0)),
            frame: UserFrame::zeroed(),
        }
    }
}

struct Inner {
    state: ThreadState,
    base_priority: u8,
    effective_priority: u8,
    /// Tick at which a sleeping thread should wake; meaningless otherwise.
    wake_tick: i64,
    /// Lock this thread is currently blocked acquiring, if any.
    waiting_on: Option<Arc<Lock>>,
    /// Threads that have raised our effective priority via donation.
    donors: Vec<Arc<Thread>>,
}

pub struct Thread {
    pub tid: Tid,
    pub name: String,
    head_canary: u64,
    inner: Mutex<Inner>,
    /// Saved architectural frame, restored by the context switch.
    ///
    /// Exclusive access is guaranteed by the single-CPU invariant that at
    /// most one thread is ever `Running`; the scheduler only touches a
    /// thread's context while that thread is not running.
    pub context: UnsafeCell<X86_64Context>,
    /// Top of this thread's kernel stack, installed into the TSS RSP0 field
    /// whenever this thread is switched in. For a plain kernel thread this
    /// is also where `context` starts executing; for a user thread it stays
    /// fixed while `context`'s own stack pointer moves into user space.
    pub kernel_stack_top: u64,
    pub user: Option<Mutex<UserState>>,
    tail_canary: u64,
}

// SAFETY: `context` is only mutated by the scheduler while the owning thread
// is not Running (see field doc above); `inner` and `user` serialize all
// other mutable access behind spin locks.
unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Thread {
    /// Build a new thread with a fresh kernel-thread trampoline frame.
    pub fn new(tid: Tid, name: String, entry: usize, kernel_stack_top: usize) -> Arc<Self> {
        Arc::new(Self {
            tid,
            name,
            head_canary: STACK_CANARY,
            inner: Mutex::new(Inner {
                state: ThreadState::Ready,
                base_priority: PRI_DEFAULT,
                effective_priority: PRI_DEFAULT,
                wake_tick: 0,
                waiting_on: None,
                donors: Vec::new(),
            }),
            context: UnsafeCell::new(X86_64Context::new(entry, kernel_stack_top)),
            kernel_stack_top: kernel_stack_top as u64,
            user: None,
            tail_canary: STACK_CANARY,
        })
    }

    pub fn with_user(self: Arc<Self>, user: UserState) -> Arc<Self> {
        // Thread is freshly created and not yet published to any queue, so
        // this is the only reference.
        let mut this = Arc::try_unwrap(self).unwrap_or_else(|_| unreachable!());
        this.user = Some(Mutex::new(user));
        Arc::new(this)
    }

    pub fn state(&self) -> ThreadState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: ThreadState) {
        self.inner.lock().state = state;
    }

    pub fn priority(&self) -> u8 {
        self.inner.lock().effective_priority
    }

    pub fn base_priority(&self) -> u8 {
        self.inner.lock().base_priority
    }

    /// Explicit `set_priority`: changes the original priority and
    /// re-derives the effective one from any live donors.
    pub fn set_base_priority(&self, priority: u8) {
        let mut inner = self.inner.lock();
        inner.base_priority = priority;
        let donated_max = inner
            .donors
            .iter()
            .map(|d| d.priority())
            .max()
            .unwrap_or(0);
        inner.effective_priority = inner.base_priority.max(donated_max);
    }

    pub fn wake_tick(&self) -> i64 {
        self.inner.lock().wake_tick
    }

    pub fn set_wake_tick(&self, tick: i64) {
        self.inner.lock().wake_tick = tick;
    }

    pub fn waiting_on(&self) -> Option<Arc<Lock>> {
        self.inner.lock().waiting_on.clone()
    }

    pub fn set_waiting_on(&self, lock: Option<Arc<Lock>>) {
        self.inner.lock().waiting_on = lock;
    }

    /// Record `donor` as raising our effective priority, and propagate.
    pub fn donate_from(&self, donor: Arc<Thread>) {
        let mut inner = self.inner.lock();
        let donor_pri = donor.priority();
        if !inner.donors.iter().any(|d| Arc::ptr_eq(d, &donor)) {
            inner.donors.push(donor);
        }
        if donor_pri > inner.effective_priority {
            inner.effective_priority = donor_pri;
        }
    }

    /// Drop every donor currently waiting on `lock` and recompute our
    /// effective priority. Called by the holder when it releases `lock`.
    pub fn revoke_donors_of(&self, lock: &Arc<Lock>) {
        let mut inner = self.inner.lock();
        inner
            .donors
            .retain(|d| !matches!(d.waiting_on(), Some(ref l) if Arc::ptr_eq(l, lock)));
        let donated_max = inner
            .donors
            .iter()
            .map(|d| d.priority())
            .max()
            .unwrap_or(0);
        inner.effective_priority = inner.base_priority.max(donated_max);
    }

    /// Checked at every scheduling boundary; a blown stack corrupts one of
    /// these before it corrupts anything a user could observe.
    pub fn check_canary(&self) {
        assert_eq!(self.head_canary, STACK_CANARY, "thread {} stack overflow (head)", self.tid);
        assert_eq!(self.tail_canary, STACK_CANARY, "thread {} stack overflow (tail)", self.tid);
    }

    pub fn is_user_process(&self) -> bool {
        self.user.is_some()
    }

    /// Overwrite the saved context's CR3. Used right after construction, by
    /// whoever is building a user thread, to point the normal kernel-thread
    /// context switch at the new address space before the thread ever runs
    /// -- `context_switch` loads CR3 from here on every switch, so by the
    /// time [`Self::new`]'s trampoline entry is reached this thread's page
    /// tables are already active.
    ///
    /// # Safety
    /// Must only be called before this thread is published to the ready
    /// queue; afterwards `context` is exclusively owned by the scheduler.
    pub unsafe fn set_context_cr3(&self, cr3: u64) {
        (*self.context.get()).cr3 = cr3;
    }
}

static NEXT_TID: core::sync::atomic::AtomicU64 = core::sync::atomic::AtomicU64::new(1);

pub fn alloc_tid() -> Tid {
    NEXT_TID.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}
