//! Synchronization primitives.
//!
//! [`Semaphore`] is the primitive; [`Lock`] and [`CondVar`] are built on top
//! of it and match the three synchronization types threads are expected to
//! use directly. [`once_lock`] provides the separate concern of one-time
//! global initialization.

pub mod condvar;
pub mod lock;
pub mod once_lock;
pub mod semaphore;

pub use condvar::CondVar;
pub use lock::Lock;
pub use once_lock::{GlobalState, LazyLock, OnceLock};
pub use semaphore::Semaphore;
