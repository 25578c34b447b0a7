//! Multiboot1 header, entry trampoline, and memory-map scanner.
//!
//! Header layout and the `eax`/`ebx` boot ABI (magic / info pointer) are the
//! Multiboot1 contract GRUB implements; the info struct layout and the
//! memory-map walk are ported from `original_source/kernel/multiboot.c` and
//! `multiboot.h`. The `global_asm!` header-emission style is grounded on the
//! teacher's `arch/x86_64/multiboot.rs` (its Multiboot2 header, here adapted
//! to Multiboot1's simpler `{magic, flags, checksum}` layout).

use core::arch::global_asm;

use log::{error, info, warn};

pub const MAGIC: u32 = 0x2BAD_B002;

const FLAG_MEM: u32 = 1 << 0;
const FLAG_MMAP: u32 = 1 << 6;

const MMAP_TYPE_AVAILABLE: u32 = 1;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct MmapEntry {
    size: u32,
    addr: u64,
    len: u64,
    entry_type: u32,
}

global_asm!(
    r#"
.section .multiboot_header, "aw"
.align 4

multiboot_header_start:
    .long 0x1BADB002                // magic number
    .long 0x00000003                // flags: align modules, provide mmap
    .long -(0x1BADB002 + 0x00000003)
multiboot_header_end:

.section .text.boot
.global _start
.extern kernel_main
_start:
    mov esp, offset boot_stack_top
    push ebx
    push eax
    call kernel_main
.hang:
    cli
    hlt
    jmp .hang

.section .bss
.align 16
boot_stack_bottom:
    .skip 16384
boot_stack_top:
"#
);

/// Compute the inclusive upper bound, in bytes, that [`crate::mm::paging`]
/// should identity-map given what the memory map reports as the RAM top.
/// Broken out as a pure function so it's unit-testable.
pub fn identity_map_top(ram_top: u32) -> u32 {
    ram_top.min(crate::config::MAX_IDENTITY_MAP_BYTES)
}

/// Check the two-word Multiboot contract the entry trampoline receives:
/// the magic value, and that the info struct actually carries a memory map.
pub fn validate(magic: u32, info: &MultibootInfo) -> Result<(), crate::error::KernelError> {
    if magic != MAGIC {
        return Err(crate::error::KernelError::InvalidMultiboot { magic });
    }
    if info.flags & FLAG_MMAP == 0 {
        warn!("[mmap] bootloader did not provide a memory map");
    }
    if info.flags & FLAG_MEM == 0 {
        warn!("[mmap] bootloader did not provide basic mem_lower/mem_upper");
    }
    Ok(())
}

/// Walk the Multiboot memory map, invoking `callback(base, length, available)`
/// for each in-range entry. Returns the number of entries visited (not
/// necessarily the number passed to `callback`, since 64-bit-only entries
/// are skipped). Stride and termination conditions ported verbatim from
/// `original_source/kernel/multiboot.c`.
pub fn scan_mmap(info: &MultibootInfo, mut callback: impl FnMut(u32, u32, bool)) -> u32 {
    if info.flags & FLAG_MMAP == 0 {
        error!("[mmap] no memory map from bootloader, flags={:#x}", {
            info.flags
        });
        return 0;
    }

    let mut offset: u32 = 0;
    let mut count: u32 = 0;
    let mmap_length = info.mmap_length;
    let mmap_addr = info.mmap_addr;

    while offset < mmap_length {
        if offset + 4 > mmap_length {
            break;
        }

        // SAFETY: bring-up has already validated `mmap_addr`/`mmap_length`
        // against the bootloader-provided Multiboot info, and this walk
        // never reads past `mmap_length`.
        let entry = unsafe { &*((mmap_addr + offset) as *const MmapEntry) };
        let entry_size = entry.size;

        if entry_size == 0 {
            warn!("[mmap] entry with size=0, stopping scan");
            break;
        }

        if offset + entry_size + 4 > mmap_length {
            warn!("[mmap] entry overflows mmap_length, stopping scan");
            break;
        }

        let addr = entry.addr;
        let len = entry.len;
        if addr <= u64::from(u32::MAX) && addr + len <= 1u64 << 32 {
            let base = addr as u32;
            let length = len as u32;
            let available = entry.entry_type == MMAP_TYPE_AVAILABLE;
            callback(base, length, available);
        }

        offset += entry_size + 4;
        count += 1;
    }

    count
}

pub fn dump_mmap(info: &MultibootInfo) {
    info!("[mmap] memory map:");
    let count = scan_mmap(info, |base, length, available| {
        info!(
            "  {:#010x} - {:#010x} [{}]",
            base,
            base + length,
            if available { "available" } else { "reserved" }
        );
    });
    info!("[mmap] entries: {count}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_entries(entries: &[(u64, u64, u32)]) -> (MultibootInfo, alloc_test::Buf) {
        let mut buf = alloc_test::Buf::new();
        for &(addr, len, entry_type) in entries {
            buf.push_entry(addr, len, entry_type);
        }
        let info = MultibootInfo {
            flags: FLAG_MEM | FLAG_MMAP,
            mem_lower: 0,
            mem_upper: 0,
            boot_device: 0,
            cmdline: 0,
            mods_count: 0,
            mods_addr: 0,
            syms: [0; 4],
            mmap_length: buf.len() as u32,
            mmap_addr: buf.as_ptr() as u32,
        };
        (info, buf)
    }

    /// Minimal host-side backing store for synthetic mmap entries, since the
    /// real struct is read through a raw pointer built from `mmap_addr`.
    mod alloc_test {
        use super::MmapEntry;

        pub struct Buf {
            bytes: std::vec::Vec<u8>,
        }

        impl Buf {
            pub fn new() -> Self {
                Self {
                    bytes: std::vec::Vec::new(),
                }
            }

            pub fn push_entry(&mut self, addr: u64, len: u64, entry_type: u32) {
                let entry = MmapEntry {
                    size: (core::mem::size_of::<MmapEntry>() - 4) as u32,
                    addr,
                    len,
                    entry_type,
                };
                let bytes = unsafe {
                    core::slice::from_raw_parts(
                        (&entry as *const MmapEntry) as *const u8,
                        core::mem::size_of::<MmapEntry>(),
                    )
                };
                self.bytes.extend_from_slice(bytes);
            }

            pub fn len(&self) -> usize {
                self.bytes.len()
            }

            pub fn as_ptr(&self) -> *const u8 {
                self.bytes.as_ptr()
            }
        }
    }

    #[test]
    fn identity_map_top_clamps_to_configured_max() {
        assert_eq!(identity_map_top(64 * 1024 * 1024), 64 * 1024 * 1024);
        assert_eq!(
            identity_map_top(4 * 1024 * 1024 * 1024 - 1),
            crate::config::MAX_IDENTITY_MAP_BYTES
        );
    }

    #[test]
    fn validate_rejects_wrong_magic() {
        let (info, _buf) = info_with_entries(&[]);
        assert!(validate(0xBAD, &info).is_err());
        assert!(validate(MAGIC, &info).is_ok());
    }

    #[test]
    fn scan_mmap_skips_64_bit_only_regions_and_counts_all_visited() {
        let (info, _buf) = info_with_entries(&[
            (0x0, 0x9_FC00, MMAP_TYPE_AVAILABLE),
            (0x10_0000, 0x0F00_0000, MMAP_TYPE_AVAILABLE),
            (0x1_0000_0000, 0x1000, MMAP_TYPE_AVAILABLE), // entirely above 4 GiB, skipped
        ]);

        let mut seen = std::vec::Vec::new();
        let visited = scan_mmap(&info, |base, length, available| {
            seen.push((base, length, available));
        });

        assert_eq!(visited, 3);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (0x0, 0x9_FC00, true));
        assert_eq!(seen[1], (0x10_0000, 0x0F00_0000, true));
    }
}
