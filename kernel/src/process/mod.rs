//! User processes.
//!
//! There is no `Process` type here -- a user process is a
//! [`crate::sched::task::Thread`] with `user: Some(..)`. This module is the
//! handful of free functions that build, fork, and tear one down, plus the
//! registry that lets a parent find a child by tid.

pub mod creation;
pub mod cwd;
pub mod exit;
pub mod fork;
pub mod memory;
pub mod table;

/// Bring up process-related state. Must run once, after the scheduler and
/// filesystem exist, before the first call to [`creation::spawn`].
pub fn init() {
    log::info!("process::init starting");
    table::init();
    log::info!("process::init complete");
}
