//! Interrupt line registration and interrupt-level control.
//!
//! Two kinds of interrupt vectors exist: *internal* gates (CPU exceptions —
//! divide error, page fault, general protection fault) which the IDT routes
//! straight to a fixed fault handler, and *external* gates (device IRQs,
//! remapped to vectors 0x20..0x30) which land here and are dispatched to
//! whatever handler registered itself for that line. A vector with no
//! handler registered is a spurious interrupt and is silently acknowledged;
//! anything outside the external range reaching [`dispatch`] is a kernel bug
//! and panics with the vector number.
//!
//! [`disable`] returns a guard that restores the previous interrupt level on
//! drop, layered over the architecture's raw `cli`/`sti`. Every blocking
//! synchronization primitive in [`crate::sync`] takes this guard while it
//! touches its wait queue.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::sync::once_lock::GlobalState;

/// First external vector after PIC remap (vector 0x20).
pub const EXTERNAL_BASE: u8 = 0x20;
/// One past the last external vector (vector 0x30, exclusive).
pub const EXTERNAL_END: u8 = 0x30;

pub type IrqHandler = fn(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Enabled,
    Disabled,
}

struct Registry {
    #[cfg(feature = "alloc")]
    handlers: BTreeMap<u8, IrqHandler>,
    dispatched: u64,
    spurious: u64,
}

static REGISTRY: GlobalState<Mutex<Registry>> = GlobalState::new();

/// Set by an interrupt handler that wants a reschedule to happen as soon as
/// the interrupt epilogue returns, rather than waiting for the next
/// voluntary yield. The timer tick handler sets this when preemption is due.
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// True for the duration of an external interrupt handler's body. A thread
/// woken from inside one (e.g. the timer tick waking a sleeper) can't
/// safely reschedule right there -- the handler hasn't sent EOI or restored
/// its frame yet -- so wakers check this and arm [`request_yield_on_return`]
/// instead of switching immediately.
static IN_INTERRUPT: AtomicBool = AtomicBool::new(false);

/// Marks the dynamic extent of an external interrupt handler. Nests
/// correctly (restores whatever was true before on drop), though this
/// kernel never actually delivers one external interrupt inside another.
pub struct InterruptScope(bool);

impl Drop for InterruptScope {
    fn drop(&mut self) {
        IN_INTERRUPT.store(self.0, Ordering::Release);
    }
}

pub fn enter_interrupt() -> InterruptScope {
    InterruptScope(IN_INTERRUPT.swap(true, Ordering::AcqRel))
}

pub fn in_interrupt() -> bool {
    IN_INTERRUPT.load(Ordering::Acquire)
}

pub fn init() {
    REGISTRY
        .init(Mutex::new(Registry {
            #[cfg(feature = "alloc")]
            handlers: BTreeMap::new(),
            dispatched: 0,
            spurious: 0,
        }))
        .ok();
}

/// Register a handler for external vector `vector` (must be in
/// `EXTERNAL_BASE..EXTERNAL_END`).
#[cfg(feature = "alloc")]
pub fn register_handler(vector: u8, handler: IrqHandler) -> KernelResult<()> {
    if !(EXTERNAL_BASE..EXTERNAL_END).contains(&vector) {
        return Err(KernelError::InvalidArgument {
            name: "vector",
            value: "not an external interrupt vector",
        });
    }
    REGISTRY
        .with_mut(|r| {
            r.lock().handlers.insert(vector, handler);
        })
        .ok_or(KernelError::NotInitialized {
            subsystem: "irq registry",
        })
}

/// Dispatch vector `vector` to its registered handler.
///
/// Called from the IDT's external-interrupt trampoline after the PIC has
/// been told which line fired. Vectors outside the external range should
/// never reach here; that is a kernel bug, not a hardware condition.
pub fn dispatch(vector: u8) {
    assert!(
        (EXTERNAL_BASE..EXTERNAL_END).contains(&vector),
        "dispatch called on non-external vector {vector:#x}"
    );

    let handler = REGISTRY.with_mut(|r| {
        let mut r = r.lock();
        r.dispatched += 1;
        match r.handlers.get(&vector).copied() {
            Some(h) => Some(h),
            None => {
                r.spurious += 1;
                None
            }
        }
    });

    if let Some(Some(handler)) = handler {
        handler(vector);
    }
}

/// Request that the scheduler run before the current interrupt frame's
/// `iretq`. Consumed (and cleared) by the epilogue via
/// [`take_yield_on_return`].
pub fn request_yield_on_return() {
    YIELD_ON_RETURN.store(true, Ordering::Release);
}

pub fn take_yield_on_return() -> bool {
    YIELD_ON_RETURN.swap(false, Ordering::AcqRel)
}

pub fn get_level() -> Level {
    if x86_64::instructions::interrupts::are_enabled() {
        Level::Enabled
    } else {
        Level::Disabled
    }
}

/// Set the interrupt level, returning the previous one.
pub fn set_level(level: Level) -> Level {
    let old = get_level();
    match level {
        Level::Enabled => x86_64::instructions::interrupts::enable(),
        Level::Disabled => x86_64::instructions::interrupts::disable(),
    }
    old
}

/// Disable interrupts for the lifetime of the returned guard, restoring the
/// prior level (which may already have been disabled) on drop.
pub fn disable() -> impl Drop {
    crate::arch::x86_64::disable_interrupts()
}

pub fn dispatched_count() -> u64 {
    REGISTRY.with(|r| r.lock().dispatched).unwrap_or(0)
}

pub fn spurious_count() -> u64 {
    REGISTRY.with(|r| r.lock().spurious).unwrap_or(0)
}
