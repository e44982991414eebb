//! Global registry of live user threads, keyed by [`Tid`].
//!
//! `wait()` needs to find a child by tid without the parent holding a
//! reference to it directly, and `exit()` needs to hand a thread's `Arc` back
//! out when its parent finally reaps it. A flat map is all either needs --
//! there is no separate process object to index.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{collections::BTreeMap, sync::Arc};

use spin::Mutex;

use crate::sched::task::{Thread, Tid};

static THREADS: Mutex<BTreeMap<Tid, Arc<Thread>>> = Mutex::new(BTreeMap::new());

/// Initialize the thread table. Currently a no-op; kept so `process::init`
/// has a uniform place to call into every subsystem.
pub fn init() {
    crate::println!("[PROCESS] thread table initialized");
}

/// Register a newly created user thread so it can be found by tid.
pub fn register(thread: Arc<Thread>) {
    THREADS.lock().insert(thread.tid, thread);
}

/// Look up a user thread by tid.
pub fn get(tid: Tid) -> Option<Arc<Thread>> {
    THREADS.lock().get(&tid).cloned()
}

/// Remove a thread from the table, e.g. once its parent has reaped it.
pub fn remove(tid: Tid) -> Option<Arc<Thread>> {
    THREADS.lock().remove(&tid)
}

/// Number of live user threads.
pub fn count() -> usize {
    THREADS.lock().len()
}
