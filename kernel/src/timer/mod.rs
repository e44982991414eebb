//! The sleep/wake timer service.
//!
//! Every PIT tick calls [`tick`], which advances the tick counter and wakes
//! any thread in [`crate::sched::queue::SLEEP_QUEUE`] whose wake tick has
//! arrived. [`sleep`] is the other half: it parks the calling thread until a
//! given number of ticks have passed.

use core::sync::atomic::{AtomicU64, Ordering};

/// Ticks since boot. One per PIT interrupt.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Ticks per second the PIT is programmed for; used to convert a
/// millisecond sleep request into a tick count.
pub const TICKS_PER_SECOND: u64 = 100;

/// Current tick count.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Advance the tick counter and wake any thread whose sleep has expired.
/// Called from the timer interrupt handler; never call this from anywhere
/// else.
pub fn tick() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    let due = super::sched::queue::SLEEP_QUEUE.lock().drain_due(now as i64);
    for thread in due {
        crate::sched::unblock(thread);
    }
    crate::sched::on_tick(now);
}

/// Block the calling thread until at least `ticks` timer ticks have
/// elapsed. `ticks == 0` degenerates to a bare [`crate::sched::yield_cpu`]:
/// Pintos programs rely on `timer_sleep(0)` meaning "let someone else run",
/// not "sleep forever".
pub fn sleep(ticks: i64) {
    if ticks <= 0 {
        crate::sched::yield_cpu();
        return;
    }
    let wake_at = TICKS.load(Ordering::Relaxed) as i64 + ticks;
    crate::sched::sleep_current_until(wake_at);
}

/// Milliseconds since boot, derived from the tick counter.
pub fn uptime_ms() -> u64 {
    ticks() * 1000 / TICKS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn ticks_only_moves_forward() {
        let before = ticks();
        tick();
        assert!(ticks() > before);
    }
}
