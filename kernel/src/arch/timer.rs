//! Architecture-independent timer interface

/// Current timer tick count, advanced once per PIT interrupt.
pub fn get_ticks() -> u64 {
    crate::arch::x86_64::timer::get_ticks()
}
