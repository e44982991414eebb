//! Scheduler queues: a ready queue indexed by effective priority and a
//! sleep queue ordered by wake tick.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::{collections::VecDeque, sync::Arc, vec::Vec};

use spin::Mutex;

use super::task::{Thread, Tid, PRI_MAX};
use crate::sync::LazyLock;

/// One FIFO run per priority level; `pop_highest` always drains the
/// highest non-empty level first, so within a level threads run in the
/// order they became ready.
pub struct ReadyQueue {
    levels: [VecDeque<Arc<Thread>>; PRI_MAX as usize + 1],
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            levels: core::array::from_fn(|_| VecDeque::new()),
        }
    }

    pub fn push(&mut self, thread: Arc<Thread>) {
        let level = thread.priority() as usize;
        self.levels[level].push_back(thread);
    }

    pub fn pop_highest(&mut self) -> Option<Arc<Thread>> {
        self.levels.iter_mut().rev().find_map(|q| q.pop_front())
    }

    /// Remove a specific thread, wherever its current priority level put
    /// it. Needed when a thread's priority changes while it is already
    /// queued (donation) or when it is killed while ready.
    pub fn remove(&mut self, tid: Tid) -> bool {
        for level in &mut self.levels {
            if let Some(pos) = level.iter().position(|t| t.tid == tid) {
                level.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|q| q.is_empty())
    }

    /// Priority of the thread `pop_highest` would return next, if any.
    pub fn highest_priority(&self) -> Option<u8> {
        self.levels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, q)| !q.is_empty())
            .map(|(level, _)| level as u8)
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|q| q.len()).sum()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Threads blocked in `timer::sleep`, kept sorted ascending by wake tick so
/// the tick handler only ever inspects the front of the list.
pub struct SleepQueue {
    entries: Vec<Arc<Thread>>,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, thread: Arc<Thread>) {
        let wake_tick = thread.wake_tick();
        let pos = self
            .entries
            .iter()
            .position(|t| t.wake_tick() > wake_tick)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, thread);
    }

    /// Remove and return every thread whose wake tick has arrived.
    pub fn drain_due(&mut self, now: i64) -> Vec<Arc<Thread>> {
        let split = self
            .entries
            .iter()
            .position(|t| t.wake_tick() > now)
            .unwrap_or(self.entries.len());
        self.entries.drain(..split).collect()
    }

    pub fn remove(&mut self, tid: Tid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|t| t.tid != tid);
        self.entries.len() != before
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub static READY_QUEUE: LazyLock<Mutex<ReadyQueue>> = LazyLock::new(|| Mutex::new(ReadyQueue::new()));

pub static SLEEP_QUEUE: Mutex<SleepQueue> = Mutex::new(SleepQueue::new());

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    #[test_case]
    fn ready_queue_drains_highest_priority_first() {
        let mut q = ReadyQueue::new();
        let low = Thread::new(100, String::from("low"), 0, 0);
        low.set_base_priority(10);
        let high = Thread::new(101, String::from("high"), 0, 0);
        high.set_base_priority(50);
        q.push(low.clone());
        q.push(high.clone());
        assert_eq!(q.pop_highest().unwrap().tid, high.tid);
        assert_eq!(q.pop_highest().unwrap().tid, low.tid);
        assert!(q.is_empty());
    }

    #[test_case]
    fn sleep_queue_drains_in_wake_order() {
        let mut q = SleepQueue::new();
        let a = Thread::new(200, String::from("a"), 0, 0);
        a.set_wake_tick(50);
        let b = Thread::new(201, String::from("b"), 0, 0);
        b.set_wake_tick(10);
        q.insert(a.clone());
        q.insert(b.clone());
        let due = q.drain_due(20);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].tid, b.tid);
        let due = q.drain_due(100);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].tid, a.tid);
    }
}
