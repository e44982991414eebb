//! System call dispatch.
//!
//! Fourteen calls, numbered the way a Pintos `syscall-nr.h` numbers them.
//! [`crate::arch::x86_64::syscall::syscall_entry`] reshuffles the raw
//! `SYSCALL` arguments into this function's calling convention before
//! calling it; see that module for the exact register mapping.

mod filesystem;
mod process;
pub mod uaccess;

/// Syscall numbers, fixed so a user program compiled against them never
/// needs to change.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syscall {
    Halt = 0,
    Exit = 1,
    Fork = 2,
    Exec = 3,
    Wait = 4,
    Create = 5,
    Remove = 6,
    Open = 7,
    Filesize = 8,
    Read = 9,
    Write = 10,
    Seek = 11,
    Tell = 12,
    Close = 13,
}

impl TryFrom<u64> for Syscall {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Halt,
            1 => Self::Exit,
            2 => Self::Fork,
            3 => Self::Exec,
            4 => Self::Wait,
            5 => Self::Create,
            6 => Self::Remove,
            7 => Self::Open,
            8 => Self::Filesize,
            9 => Self::Read,
            10 => Self::Write,
            11 => Self::Seek,
            12 => Self::Tell,
            13 => Self::Close,
            _ => return Err(()),
        })
    }
}

/// Entry point called by [`crate::arch::x86_64::syscall::syscall_entry`].
/// Arguments are untyped `u64`s; each handler below casts them to whatever
/// its call actually takes.
#[no_mangle]
pub extern "C" fn syscall_handler(num: u64, a1: u64, a2: u64, a3: u64) -> isize {
    let Ok(call) = Syscall::try_from(num) else {
        return -1;
    };

    match call {
        Syscall::Halt => process::sys_halt(),
        Syscall::Exit => process::sys_exit(a1 as i32),
        Syscall::Fork => process::sys_fork(),
        Syscall::Exec => process::sys_exec(a1 as usize),
        Syscall::Wait => process::sys_wait(a1),
        Syscall::Create => filesystem::sys_create(a1 as usize, a2),
        Syscall::Remove => filesystem::sys_remove(a1 as usize),
        Syscall::Open => filesystem::sys_open(a1 as usize),
        Syscall::Filesize => filesystem::sys_filesize(a1 as usize),
        Syscall::Read => filesystem::sys_read(a1 as usize, a2 as usize, a3 as usize),
        Syscall::Write => filesystem::sys_write(a1 as usize, a2 as usize, a3 as usize),
        Syscall::Seek => filesystem::sys_seek(a1 as usize, a2),
        Syscall::Tell => filesystem::sys_tell(a1 as usize),
        Syscall::Close => filesystem::sys_close(a1 as usize),
    }
}
