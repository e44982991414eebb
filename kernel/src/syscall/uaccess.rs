//! Helpers for touching memory a syscall argument points at.
//!
//! A user thread's address space is already active (it's whatever CR3 was
//! loaded when the `syscall` instruction trapped in), so these just need to
//! bounds-check the pointer against the user region before dereferencing it
//! -- there is no separate "copy from user" page-table walk to do.

use crate::error::{KernelError, SyscallError};
use crate::process::memory::{USER_SPACE_END, USER_SPACE_START};

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::{string::String, vec::Vec};

/// Confirm `[ptr, ptr+len)` lies entirely within the user address region.
/// Does not confirm the range is actually mapped -- a wild but in-range
/// pointer still faults on access, same as real hardware.
pub fn validate_range(ptr: usize, len: usize) -> Result<(), KernelError> {
    if ptr == 0 {
        return Err(KernelError::SyscallError(SyscallError::InvalidPointer { addr: ptr }));
    }
    let end = ptr.checked_add(len).ok_or(KernelError::SyscallError(SyscallError::InvalidPointer { addr: ptr }))?;
    if ptr < USER_SPACE_START || end > USER_SPACE_END {
        return Err(KernelError::SyscallError(SyscallError::InvalidPointer { addr: ptr }));
    }
    Ok(())
}

/// Read a NUL-terminated string out of user memory, up to `max_len` bytes.
#[cfg(feature = "alloc")]
pub fn user_str(ptr: usize, max_len: usize) -> Result<String, KernelError> {
    validate_range(ptr, 1)?;

    let mut bytes = Vec::new();
    // SAFETY: `ptr` was just validated as lying in the user region of the
    // currently active address space; reading stops at the first NUL or
    // `max_len`, whichever comes first.
    unsafe {
        let mut cur = ptr as *const u8;
        for _ in 0..max_len {
            let byte = *cur;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            cur = cur.add(1);
        }
    }

    String::from_utf8(bytes).map_err(|_| KernelError::SyscallError(SyscallError::InvalidArgument { arg: 0 }))
}

/// Borrow `len` bytes of user memory as a read slice for the duration of a
/// closure.
pub fn read_user_buf<R>(ptr: usize, len: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R, KernelError> {
    validate_range(ptr, len)?;
    // SAFETY: range validated above; caller only reads within `f`.
    let slice = unsafe { core::slice::from_raw_parts(ptr as *const u8, len) };
    Ok(f(slice))
}

/// Borrow `len` bytes of user memory as a write slice for the duration of a
/// closure.
pub fn write_user_buf<R>(ptr: usize, len: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, KernelError> {
    validate_range(ptr, len)?;
    // SAFETY: range validated above; caller only writes within `f`.
    let slice = unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) };
    Ok(f(slice))
}
