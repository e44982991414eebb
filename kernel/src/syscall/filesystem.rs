//! `create`, `remove`, `open`, `filesize`, `read`, `write`, `seek`, `tell`,
//! `close`.
//!
//! File descriptors 0/1/2 are reserved for the console and never reach
//! [`crate::fs::file::FileTable`] -- `read` from stdin pulls decoded
//! keystrokes off the keyboard buffer, `write` to stdout/stderr goes
//! straight out the serial console, both through [`crate::drivers::console`].

#[cfg(feature = "alloc")]
extern crate alloc;

use crate::fs::file::{File, OpenFlags};
use crate::fs::SeekFrom;

use super::uaccess::{read_user_buf, user_str, write_user_buf};

const STDIN: usize = 0;
const STDOUT: usize = 1;
const STDERR: usize = 2;

/// Create a new, empty file named by the user-space string at `path_ptr`.
pub fn sys_create(path_ptr: usize, initial_size: u64) -> isize {
    let Ok(path) = user_str(path_ptr, 4096) else { return -1 };
    match crate::fs::create_file(&path, initial_size as usize) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Unlink the file named by the user-space string at `path_ptr`.
pub fn sys_remove(path_ptr: usize) -> isize {
    let Ok(path) = user_str(path_ptr, 4096) else { return -1 };
    match crate::fs::remove_file(&path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Open the file named by the user-space string at `path_ptr` and return a
/// descriptor in the calling thread's file table.
pub fn sys_open(path_ptr: usize) -> isize {
    let Ok(path) = user_str(path_ptr, 4096) else { return -1 };

    let node = match crate::fs::get_vfs().read().resolve_path(&path) {
        Ok(node) => node,
        Err(_) => return -1,
    };

    let file = alloc::sync::Arc::new(File::new(node, OpenFlags::read_write()));

    let me = crate::sched::current();
    let user = me.user.as_ref().expect("open() from a kernel thread").lock();
    match user.fd_table.open(file) {
        Ok(fd) => fd as isize,
        Err(_) => -1,
    }
}

/// Byte length of the file open on `fd`, or -1 if `fd` is invalid or a
/// console descriptor.
pub fn sys_filesize(fd: usize) -> isize {
    if fd < 3 {
        return -1;
    }
    let me = crate::sched::current();
    let user = me.user.as_ref().expect("filesize() from a kernel thread").lock();
    let Some(file) = user.fd_table.get(fd) else { return -1 };
    match file.node.metadata() {
        Ok(meta) => meta.size as isize,
        Err(_) => -1,
    }
}

pub fn sys_read(fd: usize, buf_ptr: usize, count: usize) -> isize {
    if fd == STDIN {
        let result = write_user_buf(buf_ptr, count, |slice| {
            Ok::<usize, ()>(crate::drivers::console::read(slice))
        });
        return match result {
            Ok(Ok(n)) => n as isize,
            _ => -1,
        };
    }
    if fd == STDOUT || fd == STDERR {
        return -1;
    }

    let me = crate::sched::current();
    let user = me.user.as_ref().expect("read() from a kernel thread").lock();
    let Some(file) = user.fd_table.get(fd) else { return -1 };
    drop(user);

    let result = write_user_buf(buf_ptr, count, |slice| file.read(slice));
    match result {
        Ok(Ok(n)) => n as isize,
        _ => -1,
    }
}

pub fn sys_write(fd: usize, buf_ptr: usize, count: usize) -> isize {
    if fd == STDOUT || fd == STDERR {
        let result = read_user_buf(buf_ptr, count, |slice| crate::drivers::console::write(slice));
        return result.map(|n| n as isize).unwrap_or(-1);
    }
    if fd == STDIN {
        return -1;
    }

    let me = crate::sched::current();
    let user = me.user.as_ref().expect("write() from a kernel thread").lock();
    let Some(file) = user.fd_table.get(fd) else { return -1 };
    drop(user);

    let result = read_user_buf(buf_ptr, count, |slice| file.write(slice));
    match result {
        Ok(Ok(n)) => n as isize,
        _ => -1,
    }
}

pub fn sys_seek(fd: usize, position: u64) -> isize {
    if fd < 3 {
        return -1;
    }
    let me = crate::sched::current();
    let user = me.user.as_ref().expect("seek() from a kernel thread").lock();
    let Some(file) = user.fd_table.get(fd) else { return -1 };
    match file.seek(SeekFrom::Start(position as usize)) {
        Ok(pos) => pos as isize,
        Err(_) => -1,
    }
}

pub fn sys_tell(fd: usize) -> isize {
    if fd < 3 {
        return -1;
    }
    let me = crate::sched::current();
    let user = me.user.as_ref().expect("tell() from a kernel thread").lock();
    let Some(file) = user.fd_table.get(fd) else { return -1 };
    file.tell() as isize
}

pub fn sys_close(fd: usize) -> isize {
    if fd < 3 {
        return 0;
    }
    let me = crate::sched::current();
    let user = me.user.as_ref().expect("close() from a kernel thread").lock();
    match user.fd_table.close(fd) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
