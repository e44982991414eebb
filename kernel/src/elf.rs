//! ELF64 loader for user program execution.
//!
//! Parses the handful of fields Pintos cares about -- entry point and
//! `PT_LOAD` segments -- and maps each segment into a process's address
//! space. Anything else in the file (section headers, dynamic linking,
//! relocations) is ignored; this kernel only runs statically linked
//! executables.

use core::mem;
use core::slice;

#[cfg(feature = "alloc")]
extern crate alloc;
use alloc::vec::Vec;

use crate::error::KernelError;
use crate::mm::vas::VirtualAddressSpace;
use crate::mm::{PageFlags, PAGE_SIZE};

/// Above this, `map_kernel_space` has already claimed the address range for
/// the kernel; no user segment may load there.
const KERNEL_SPACE_START: u64 = 0xFFFF_8000_0000_0000;

/// Hard ceiling on program headers a single executable may declare, to
/// bound the work `get_program_headers` does for a hostile or corrupt file.
const MAX_PROGRAM_HEADERS: usize = 1024;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64Header {
    pub magic: [u8; 4],
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub osabi: u8,
    pub abiversion: u8,
    pub pad: [u8; 7],
    pub elf_type: u16,
    pub machine: u16,
    pub version2: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Elf64ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELF_CLASS_64: u8 = 2;
const ELF_DATA_2LSB: u8 = 1;
const ELF_VERSION_CURRENT: u8 = 1;
const ELF_MACHINE_X86_64: u16 = 0x3E;

/// `e_type` values; only `ET_EXEC` (a plain, non-PIE static executable) is
/// accepted. `ET_DYN` would imply a dynamic linker this kernel doesn't have.
const ET_EXEC: u16 = 2;

const PT_LOAD: u32 = 1;

const PF_X: u32 = 0x1;

pub struct ElfLoader;

impl ElfLoader {
    pub fn validate_header(data: &[u8]) -> Result<&Elf64Header, KernelError> {
        if data.len() < mem::size_of::<Elf64Header>() {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "file too small for an ELF header",
            });
        }

        // SAFETY: `data` was just checked to hold at least
        // `size_of::<Elf64Header>()` bytes; `Elf64Header` has no padding
        // requiring initialization beyond raw bytes (repr(C), all-integer
        // fields).
        let header = unsafe { &*(data.as_ptr() as *const Elf64Header) };

        if header.magic != ELF_MAGIC {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "bad magic",
            });
        }
        if header.class != ELF_CLASS_64 {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "not a 64-bit ELF",
            });
        }
        if header.data != ELF_DATA_2LSB {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "not little-endian",
            });
        }
        if header.version != ELF_VERSION_CURRENT {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "unsupported version",
            });
        }
        if header.machine != ELF_MACHINE_X86_64 {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "not an x86_64 executable",
            });
        }
        if header.elf_type != ET_EXEC {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "not a static executable (ET_EXEC)",
            });
        }
        if header.phnum as usize > MAX_PROGRAM_HEADERS {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "too many program headers",
            });
        }

        Ok(header)
    }

    pub fn get_program_headers(
        data: &[u8],
        header: &Elf64Header,
    ) -> Result<Vec<Elf64ProgramHeader>, KernelError> {
        let mut headers = Vec::new();

        if header.phoff == 0 || header.phnum == 0 {
            return Ok(headers);
        }

        let ph_start = header.phoff as usize;
        let ph_size = header.phentsize as usize;
        let ph_count = header.phnum as usize;

        let table_len = ph_size
            .checked_mul(ph_count)
            .and_then(|len| ph_start.checked_add(len))
            .ok_or(KernelError::InvalidArgument {
                name: "elf",
                value: "program header table size overflows",
            })?;
        if table_len > data.len() {
            return Err(KernelError::InvalidArgument {
                name: "elf",
                value: "program headers out of bounds",
            });
        }

        for i in 0..ph_count {
            let offset = ph_start + i * ph_size;
            // SAFETY: `offset + size_of::<Elf64ProgramHeader>() <= table_len
            // <= data.len()`, checked above.
            let ph = unsafe { &*(data.as_ptr().add(offset) as *const Elf64ProgramHeader) };
            headers.push(*ph);
        }

        Ok(headers)
    }

    /// Map and populate every `PT_LOAD` segment into `vas`.
    ///
    /// Rejects segments that would load at address 0 (so a null pointer
    /// dereference in the loaded program faults instead of reading real
    /// data), that reach into kernel address space, or whose range wraps.
    pub fn load_segments(
        data: &[u8],
        headers: &[Elf64ProgramHeader],
        vas: &mut VirtualAddressSpace,
    ) -> Result<(), KernelError> {
        for header in headers {
            if header.p_type != PT_LOAD {
                continue;
            }

            if header.filesz > header.memsz {
                return Err(KernelError::InvalidArgument {
                    name: "elf",
                    value: "segment filesz exceeds memsz",
                });
            }

            let vaddr = header.vaddr;
            let memsz = header.memsz;
            let filesz = header.filesz as usize;
            let offset = header.offset as usize;

            if vaddr == 0 {
                return Err(KernelError::InvalidArgument {
                    name: "elf",
                    value: "segment maps address 0",
                });
            }
            let seg_end = vaddr.checked_add(memsz).ok_or(KernelError::InvalidArgument {
                name: "elf",
                value: "segment range wraps",
            })?;
            if seg_end > KERNEL_SPACE_START {
                return Err(KernelError::InvalidArgument {
                    name: "elf",
                    value: "segment reaches into kernel address space",
                });
            }
            if offset.checked_add(filesz).ok_or(KernelError::InvalidArgument {
                name: "elf",
                value: "segment file range wraps",
            })? > data.len()
            {
                return Err(KernelError::InvalidArgument {
                    name: "elf",
                    value: "segment data out of bounds",
                });
            }

            let vaddr = vaddr as usize;
            let memsz = memsz as usize;
            let page_start = vaddr & !(PAGE_SIZE - 1);
            let page_end = (vaddr + memsz).div_ceil(PAGE_SIZE) * PAGE_SIZE;
            let num_pages = (page_end - page_start) / PAGE_SIZE;

            let mut flags = PageFlags::USER | PageFlags::PRESENT | PageFlags::WRITABLE;
            if header.flags & PF_X == 0 {
                flags = flags | PageFlags::NO_EXECUTE;
            }

            for i in 0..num_pages {
                let page_addr = page_start + i * PAGE_SIZE;
                vas.map_page(page_addr, flags)?;
            }

            // SAFETY: every page in `[page_start, page_end)` was just mapped
            // present/writable into the *currently active* address space by
            // `map_page`, and `filesz`/`memsz` were bounds-checked above
            // against both the source file and the kernel/address-space
            // boundary, so these writes land entirely inside freshly
            // mapped, writable user memory.
            unsafe {
                let segment_data = &data[offset..offset + filesz];
                let dest = slice::from_raw_parts_mut(vaddr as *mut u8, filesz);
                dest.copy_from_slice(segment_data);

                if memsz > filesz {
                    let zero_start = vaddr + filesz;
                    let zero_size = memsz - filesz;
                    let zeros = slice::from_raw_parts_mut(zero_start as *mut u8, zero_size);
                    zeros.fill(0);
                }
            }
        }

        Ok(())
    }

    /// Validate, map, and populate every loadable segment of `data` into
    /// `vas`, returning the program's entry point.
    pub fn load(data: &[u8], vas: &mut VirtualAddressSpace) -> Result<u64, KernelError> {
        let header = Self::validate_header(data)?;
        let program_headers = Self::get_program_headers(data, header)?;
        Self::load_segments(data, &program_headers, vas)?;
        Ok(header.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn rejects_bad_magic() {
        let mut data = [0u8; 64];
        data[0] = 0x7f;
        assert!(ElfLoader::validate_header(&data).is_err());
    }

    #[test_case]
    fn rejects_truncated_header() {
        let data = [0u8; 4];
        assert!(ElfLoader::validate_header(&data).is_err());
    }
}
