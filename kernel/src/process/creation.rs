//! Builds the first thread of a user program from a command line: loads the
//! executable, maps a fresh stack, and lays out `argv` the way a freshly
//! `exec`'d Pintos process expects to find it.

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use crate::elf::ElfLoader;
use crate::error::{FsError, KernelError};
use crate::mm::vas::VirtualAddressSpace;
use crate::mm::{PageFlags, PAGE_SIZE};
use crate::sched::task::{Thread, Tid, UserFrame, UserState};

use super::memory::STACK_TOP;

fn parse_args(cmdline: &str) -> Vec<String> {
    cmdline.split_whitespace().map(ToString::to_string).collect()
}

/// Where one argument's NUL-terminated bytes land on the stack; also the
/// pointer value that goes in `argv[]` for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArgSlot {
    addr: u64,
}

/// Pure layout math for [`setup_stack`], split out so it can be checked
/// without a real mapped page behind it: where each argument string and the
/// `argv` pointer array itself land, working down from `top`, and the final
/// `rsp`. `args[0]` is the program name, laid out last (lowest address)
/// since strings are pushed in reverse so `argv[0]` still names it first.
///
/// Returns `(arg_slots, argv_base, rsp)`. Fails the same way `setup_stack`
/// does if the strings don't fit above `floor`.
fn layout_argv(args: &[String], top: u64, floor: u64) -> Result<(Vec<ArgSlot>, u64, u64), KernelError> {
    let mut sp = top;
    let mut slots = Vec::with_capacity(args.len());

    for arg in args.iter().rev() {
        sp -= (arg.len() + 1) as u64;
        if sp < floor {
            return Err(KernelError::InvalidArgument {
                name: "cmd_line",
                value: "arguments too large for one stack page",
            });
        }
        slots.push(ArgSlot { addr: sp });
    }
    slots.reverse();

    sp &= !0x7;

    sp -= 8; // argv[argc] = NULL
    let argv_base = sp - 8 * slots.len() as u64;
    sp = argv_base;

    sp -= 8; // fake return address beneath argv, for the iretq-shaped frame
    Ok((slots, argv_base, sp))
}

/// Write `argv` onto the single stack page mapped at `STACK_TOP - PAGE_SIZE`
/// and return `(argv_base, rsp)`.
///
/// Strings are pushed right to left, NUL-terminated; the pointer array
/// follows the same order so `argv[0]` still names the program. A fake
/// return address sits below everything else, keeping `rsp` 8-byte aligned
/// at what looks like a `call` boundary, as the entry trampoline's `iretq`
/// expects.
///
/// # Safety
/// The caller's address space must already be active (its CR3 loaded) and
/// the stack's top page already mapped present/writable/user -- this writes
/// directly through user virtual addresses, not the kernel's physical
/// memory window.
unsafe fn setup_stack(args: &[String]) -> Result<(u64, u64), KernelError> {
    let top = STACK_TOP as u64;
    let floor = (STACK_TOP - PAGE_SIZE) as u64;
    let (slots, argv_base, rsp) = layout_argv(args, top, floor)?;

    for (arg, slot) in args.iter().zip(slots.iter()) {
        let bytes = arg.as_bytes();
        // SAFETY: per this function's safety contract, `slot.addr` lies
        // within the caller's mapped, writable, active stack page --
        // `layout_argv` rejected anything that would fall below `floor`.
        unsafe {
            let dst = slot.addr as *mut u8;
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            *dst.add(bytes.len()) = 0;
        }
    }

    let mut ptr_slot = argv_base + 8 * slots.len() as u64;
    // SAFETY: see above.
    unsafe { *(ptr_slot as *mut u64) = 0 }; // argv[argc] = NULL
    for slot in slots.iter().rev() {
        ptr_slot -= 8;
        // SAFETY: see above.
        unsafe { *(ptr_slot as *mut u64) = slot.addr };
    }
    debug_assert_eq!(ptr_slot, argv_base);

    Ok((argv_base, rsp))
}

/// Everything a loaded program needs before it can be handed `UserFrame`
/// control: the program's own name (argv[0]), the address space it was
/// built in, and where it resumes.
pub struct LoadedProgram {
    pub name: String,
    pub vas: VirtualAddressSpace,
    pub frame: UserFrame,
}

/// Load `cmdline`'s program into a fresh address space: read the
/// executable, build a new VAS with the standard kernel mappings, map its
/// stack page, run the ELF loader, and lay out `argv` on the new stack.
///
/// Activates `vas` as a side effect (the loader and stack setup both write
/// through user virtual addresses), but does not touch the caller's thread
/// or register state -- [`spawn`] uses this to build another thread's
/// image, and exec uses it to build a replacement for the caller's own.
fn load_program(cmdline: &str) -> Result<LoadedProgram, KernelError> {
    let args = parse_args(cmdline);
    let program = args
        .first()
        .ok_or(KernelError::InvalidArgument {
            name: "cmd_line",
            value: "empty command line",
        })?
        .clone();

    let data = crate::fs::read_file(&program).map_err(|_| KernelError::FsError(FsError::NotFound))?;

    let mut vas = VirtualAddressSpace::new();
    vas.init()?;
    vas.activate();

    let stack_page = STACK_TOP - PAGE_SIZE;
    vas.map_page(
        stack_page,
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER | PageFlags::NO_EXECUTE,
    )?;

    let entry = ElfLoader::load(&data, &mut vas)?;
    // SAFETY: `vas` was just activated and its stack page just mapped.
    let (argv_base, rsp) = unsafe { setup_stack(&args)? };

    let frame = UserFrame {
        rip: entry,
        rsp,
        rflags: 0x202,
        rax: 0,
        rdi: args.len() as u64,
        rsi: argv_base,
    };

    Ok(LoadedProgram { name: program, vas, frame })
}

/// Build and publish a brand-new user thread running `cmdline`'s program.
/// `parent`/`cwd` become the new thread's [`UserState::parent`] and initial
/// working directory. Returns the new thread's tid.
pub fn spawn(cmdline: &str, parent: Option<Tid>, cwd: String) -> Result<Tid, KernelError> {
    let loaded = load_program(cmdline)?;

    let mut user = UserState::new(loaded.vas, parent, cwd);
    user.frame = loaded.frame;
    let root = user.page_table_root;

    let thread = crate::sched::new_user_thread(&loaded.name);
    let tid = thread.tid;
    // SAFETY: `thread` was just built by `new_user_thread` and has not been
    // published to the ready queue; nothing else can read its context.
    unsafe { thread.set_context_cr3(root) };
    let thread = thread.with_user(user);

    super::table::register(thread.clone());
    crate::sched::publish(thread);

    Ok(tid)
}

/// Replace the calling thread's own address space with `cmdline`'s program,
/// in place -- the real Pintos `exec` semantics this teaches, not a spawn.
/// On success the old address space is gone and the returned [`UserFrame`]
/// is where the caller resumes; on failure (bad command line, file not
/// found, bad ELF) the caller's existing address space and all its state
/// are untouched and it keeps running as before.
pub fn exec_in_place(thread: &Arc<Thread>, cmdline: &str) -> Result<UserFrame, KernelError> {
    let loaded = load_program(cmdline)?;

    let user_lock = thread.user.as_ref().expect("exec from a kernel thread");
    let mut user = user_lock.lock();

    {
        let mut old_vas = user.vas.lock();
        old_vas.destroy();
    }

    let new_root = loaded.vas.get_page_table();
    *user.vas.lock() = loaded.vas;
    user.page_table_root = new_root;
    user.frame = loaded.frame;
    // SAFETY: this thread is the one currently running; overwriting its own
    // saved CR3 only matters the next time it's switched back in, which
    // can't happen concurrently with this call.
    unsafe { thread.set_context_cr3(new_root) };

    Ok(loaded.frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whitespace_separated_args() {
        let args = parse_args("  echo  hello   world ");
        assert_eq!(args, alloc::vec!["echo", "hello", "world"]);
    }

    #[test]
    fn parses_single_argument() {
        assert_eq!(parse_args("init"), alloc::vec!["init"]);
    }

    /// `exec("echo x y z")` should yield argc=4, argv[0..3] naming
    /// "echo","x","y","z" in order, argv[4] == NULL, and an 8-byte aligned
    /// final `rsp`.
    #[test]
    fn argv_layout_matches_exec_echo_example() {
        let args = parse_args("echo x y z");
        assert_eq!(args.len(), 4);

        let top = 0x7fff_ffff_f000u64;
        let floor = top - 4096;
        let (slots, argv_base, rsp) = layout_argv(&args, top, floor).unwrap();

        assert_eq!(slots.len(), 4);
        // Strings are pushed right to left, so slots[0] (the program name)
        // ends up at the lowest address of the four, still first in
        // argument order.
        for w in slots.windows(2) {
            assert!(w[0].addr < w[1].addr, "argv slots must not overlap or reorder");
        }
        assert_eq!(rsp % 8, 0, "rsp must be 8-byte aligned for the iretq frame");
        assert!(rsp < argv_base, "fake return address sits below argv[]");
    }

    #[test]
    fn layout_argv_rejects_oversized_arguments() {
        let args = alloc::vec!["x".repeat(5000)];
        let top = 0x7fff_ffff_f000u64;
        let floor = top - 4096;
        assert!(layout_argv(&args, top, floor).is_err());
    }
}
