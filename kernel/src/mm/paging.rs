//! Identity-mapped paging with a recursive page directory.
//!
//! Ported from `original_source/kernel/paging.c`: one page directory, 4 MiB
//! page tables allocated on demand from the PMM, and page directory entry
//! 1023 pointed at the directory itself so every page table (and the
//! directory) is reachable through a fixed virtual window without tracking
//! physical-to-virtual translations once paging is live.

use core::arch::asm;

use log::info;

use super::pmm;
use crate::error::PagingError;

pub const PAGE_SIZE: u32 = 4096;

pub const PTE_PRESENT: u32 = 1 << 0;
pub const PTE_WRITABLE: u32 = 1 << 1;
pub const PTE_USER: u32 = 1 << 2;

const PTE_ADDR_MASK: u32 = 0xFFFF_F000;

pub const RECURSIVE_PD_INDEX: u32 = 1023;
pub const RECURSIVE_PD_VADDR: u32 = 0xFFFF_F000;
pub const RECURSIVE_PT_BASE: u32 = 0xFFC0_0000;

/// Split a virtual address into its page-directory and page-table indices.
pub fn split_vaddr(vaddr: u32) -> (u32, u32) {
    let pd_index = (vaddr >> 22) & 0x3FF;
    let pt_index = (vaddr >> 12) & 0x3FF;
    (pd_index, pt_index)
}

/// Virtual address through which page table `pd_index` can be reached once
/// the recursive mapping is installed.
pub fn recursive_pt_vaddr(pd_index: u32) -> u32 {
    RECURSIVE_PT_BASE + pd_index * PAGE_SIZE
}

fn zero_page(phys: u32) {
    // SAFETY: `phys` was just returned by `pmm::alloc_page`/`alloc_contiguous`
    // and is identity-mapped (paging isn't enabled yet during `init`, or the
    // page is within the already-identity-mapped range afterward).
    unsafe {
        let ptr = phys as *mut u32;
        for i in 0..(PAGE_SIZE / 4) as isize {
            ptr.offset(i).write(0);
        }
    }
}

fn cr3_write(pd_phys: u32) {
    // SAFETY: `pd_phys` is a valid, zeroed (or fully-populated) page
    // directory physical address.
    unsafe {
        asm!("mov cr3, {0}", in(reg) pd_phys, options(nostack));
    }
}

fn cr3_read() -> u32 {
    let val: u32;
    // SAFETY: reading CR3 has no side effects.
    unsafe {
        asm!("mov {0}, cr3", out(reg) val, options(nostack, preserves_flags));
    }
    val
}

fn enable_paging() {
    // SAFETY: called once, after CR3 has been loaded with a valid page
    // directory whose first gigabyte (at minimum) identity-maps the code
    // currently executing.
    unsafe {
        asm!(
            "mov {tmp}, cr0",
            "or {tmp}, {bit}",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            bit = in(reg) 1u32 << 31,
            options(nostack)
        );
    }
}

fn invlpg(vaddr: u32) {
    // SAFETY: invalidates a single TLB entry; always safe to call, at worst
    // redundant.
    unsafe {
        asm!("invlpg [{0}]", in(reg) vaddr, options(nostack, preserves_flags));
    }
}

pub fn flush_tlb() {
    cr3_write(cr3_read());
}

/// Build the identity map up to `min(ram_top, MAX_IDENTITY_MAP_BYTES)`,
/// install the recursive self-map, load CR3, and enable paging (CR0.PG).
pub fn init(ram_top: u32) -> Result<(), PagingError> {
    let map_top = crate::arch::x86::multiboot::identity_map_top(ram_top);
    let pd_phys = pmm::alloc_page().map_err(|_| PagingError::OutOfMemory)?;
    zero_page(pd_phys);

    let mut pd_index = 0u32;
    while pd_index * 0x0040_0000 < map_top {
        let pt_phys = pmm::alloc_page().map_err(|_| PagingError::OutOfMemory)?;
        zero_page(pt_phys);

        let base_addr = pd_index * 0x0040_0000;
        for pt_entry in 0..1024u32 {
            let phys = base_addr + pt_entry * PAGE_SIZE;
            if phys >= map_top {
                break;
            }
            // SAFETY: `pt_phys` is identity-mapped (paging not yet live).
            unsafe {
                ((pt_phys + pt_entry * 4) as *mut u32)
                    .write(phys | PTE_PRESENT | PTE_WRITABLE);
            }
        }

        // SAFETY: `pd_phys` is identity-mapped (paging not yet live).
        unsafe {
            ((pd_phys + pd_index * 4) as *mut u32).write(pt_phys | PTE_PRESENT | PTE_WRITABLE);
        }
        pd_index += 1;
    }

    // SAFETY: `pd_phys` is identity-mapped (paging not yet live).
    unsafe {
        ((pd_phys + RECURSIVE_PD_INDEX * 4) as *mut u32)
            .write(pd_phys | PTE_PRESENT | PTE_WRITABLE);
    }

    cr3_write(pd_phys);
    enable_paging();

    info!("[paging] enabled, identity-mapped {} MiB", map_top / (1024 * 1024));
    Ok(())
}

/// Map `vaddr` to `paddr` with the given flags (PRESENT is always added).
/// Allocates a page table from the PMM if the covering page-directory entry
/// isn't present yet. Must be called after [`init`] (relies on the
/// recursive self-map being live).
pub fn map_page(vaddr: u32, paddr: u32, flags: u32) -> Result<(), PagingError> {
    let (pd_index, pt_index) = split_vaddr(vaddr);

    // SAFETY: the recursive self-map is installed by `init`, making this
    // window a valid view of the live page directory.
    let pd = unsafe { core::slice::from_raw_parts_mut(RECURSIVE_PD_VADDR as *mut u32, 1024) };

    if pd[pd_index as usize] & PTE_PRESENT == 0 {
        let pt_phys = pmm::alloc_page().map_err(|_| PagingError::OutOfMemory)?;
        zero_page(pt_phys);
        pd[pd_index as usize] = (pt_phys & PTE_ADDR_MASK) | PTE_PRESENT | PTE_WRITABLE;
        flush_tlb();
    }

    // SAFETY: the covering PD entry is now present, so this window reaches
    // a valid page table.
    let pt = unsafe {
        core::slice::from_raw_parts_mut(recursive_pt_vaddr(pd_index) as *mut u32, 1024)
    };
    pt[pt_index as usize] = (paddr & PTE_ADDR_MASK) | flags | PTE_PRESENT;
    invlpg(vaddr);
    Ok(())
}

pub fn unmap_page(vaddr: u32) {
    let (pd_index, pt_index) = split_vaddr(vaddr);

    // SAFETY: the recursive self-map is installed by `init`.
    let pd = unsafe { core::slice::from_raw_parts(RECURSIVE_PD_VADDR as *const u32, 1024) };
    if pd[pd_index as usize] & PTE_PRESENT == 0 {
        return;
    }

    // SAFETY: the covering PD entry is present, so this window is valid.
    let pt = unsafe {
        core::slice::from_raw_parts_mut(recursive_pt_vaddr(pd_index) as *mut u32, 1024)
    };
    pt[pt_index as usize] = 0;
    invlpg(vaddr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_vaddr_matches_x86_layout() {
        // 0xC0000000 = PD index 768, PT index 0.
        assert_eq!(split_vaddr(0xC000_0000), (768, 0));
        // Recursive self-map address decodes to PD index 1023.
        assert_eq!(split_vaddr(RECURSIVE_PD_VADDR), (RECURSIVE_PD_INDEX, 1023));
    }

    #[test]
    fn recursive_pt_vaddr_is_stride_by_page_size() {
        assert_eq!(recursive_pt_vaddr(0), RECURSIVE_PT_BASE);
        assert_eq!(recursive_pt_vaddr(1), RECURSIVE_PT_BASE + PAGE_SIZE);
    }
}
