//! Bitmap physical memory manager.
//!
//! One bit per 4 KiB page, `1` meaning reserved/used. Ported from
//! `original_source/kernel/pmm.c`: two-pass init (find RAM top, then mark
//! available regions free over an all-reserved bitmap), followed by forcing
//! the first MiB and the kernel-image-plus-bitmap region back to reserved.

use log::{error, info};
use spin::Mutex;

use crate::arch::x86::multiboot::{scan_mmap, MultibootInfo};
use crate::error::MmError;

pub const PAGE_SIZE: u32 = 4096;

struct Bitmap {
    /// Backing storage: a slice over memory placed just past the kernel
    /// image, the same way the original writes the bitmap at `kernel_end`.
    words: &'static mut [u32],
    total_pages: u32,
    free_pages: u32,
}

impl Bitmap {
    fn test(&self, page_index: u32) -> bool {
        (self.words[(page_index / 32) as usize] >> (page_index % 32)) & 1 != 0
    }

    fn set(&mut self, page_index: u32) {
        self.words[(page_index / 32) as usize] |= 1 << (page_index % 32);
    }

    fn clear(&mut self, page_index: u32) {
        self.words[(page_index / 32) as usize] &= !(1 << (page_index % 32));
    }

    fn mark_reserved(&mut self, start_addr: u32, end_addr: u32) {
        let start_page = start_addr / PAGE_SIZE;
        let end_page = ((end_addr + PAGE_SIZE - 1) / PAGE_SIZE).min(self.total_pages);
        for page in start_page..end_page {
            if !self.test(page) {
                self.set(page);
                self.free_pages = self.free_pages.saturating_sub(1);
            }
        }
    }

    fn mark_free(&mut self, start_addr: u32, end_addr: u32) {
        let start_page = start_addr / PAGE_SIZE;
        let end_page = ((end_addr + PAGE_SIZE - 1) / PAGE_SIZE).min(self.total_pages);
        for page in start_page..end_page {
            if self.test(page) {
                self.clear(page);
                self.free_pages += 1;
            }
        }
    }

    fn alloc_page(&mut self) -> Result<u32, MmError> {
        for word_index in 0..self.words.len() as u32 {
            if self.words[word_index as usize] == 0xFFFF_FFFF {
                continue;
            }
            for bit in 0..32 {
                let page_index = word_index * 32 + bit;
                if page_index >= self.total_pages {
                    return Err(MmError::OutOfMemory);
                }
                if !self.test(page_index) {
                    self.set(page_index);
                    self.free_pages = self.free_pages.saturating_sub(1);
                    return Ok(page_index * PAGE_SIZE);
                }
            }
        }
        Err(MmError::OutOfMemory)
    }

    fn free_page(&mut self, addr: u32) -> Result<(), MmError> {
        if addr & (PAGE_SIZE - 1) != 0 {
            return Err(MmError::Misaligned { addr });
        }
        let page_index = addr / PAGE_SIZE;
        if page_index >= self.total_pages {
            return Err(MmError::Misaligned { addr });
        }
        if self.test(page_index) {
            self.clear(page_index);
            self.free_pages += 1;
        }
        Ok(())
    }

    /// `count == 0` is always an error (matches the original's explicit
    /// early return rather than returning a sentinel "success").
    fn alloc_contiguous(&mut self, count: u32) -> Result<u32, MmError> {
        if count == 0 {
            return Err(MmError::ZeroLengthRequest);
        }

        let mut run_start = 0u32;
        let mut run_length = 0u32;

        for page in 0..self.total_pages {
            if self.test(page) {
                run_length = 0;
                run_start = page + 1;
            } else {
                run_length += 1;
                if run_length == count {
                    for p in run_start..run_start + count {
                        self.set(p);
                        self.free_pages = self.free_pages.saturating_sub(1);
                    }
                    return Ok(run_start * PAGE_SIZE);
                }
            }
        }

        Err(MmError::NoContiguousRun {
            requested_pages: count as usize,
        })
    }
}

pub struct Pmm {
    bitmap: Option<Bitmap>,
    bitmap_end: u32,
}

impl Pmm {
    const fn new() -> Self {
        Pmm {
            bitmap: None,
            bitmap_end: 0,
        }
    }
}

static PMM: Mutex<Pmm> = Mutex::new(Pmm::new());

/// Compute how many 32-bit words a bitmap covering `total_pages` pages
/// needs. Broken out for unit testing independent of any real memory map.
pub fn bitmap_word_count(total_pages: u32) -> u32 {
    (total_pages + 31) / 32
}

/// Page-align `addr` upward to the next page boundary.
pub fn page_align_up(addr: u32) -> u32 {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Initialize the bitmap allocator from the Multiboot memory map. `kernel_end`
/// is the first free physical address past the kernel image; the bitmap
/// itself is placed there. Returns the detected RAM top in bytes, or an
/// error if the memory map is unusable (mirrors the original returning 0).
///
/// # Safety
///
/// `kernel_end` must point at physical memory that is actually free and at
/// least `bitmap_word_count(total_pages) * 4` bytes are available there for
/// the bitmap's own storage.
pub unsafe fn init(kernel_end: u32, info: &MultibootInfo) -> Result<u32, MmError> {
    let mut ram_top: u32 = 0;
    let visited = scan_mmap(info, |base, length, available| {
        if available && length != 0 {
            let top = base + length;
            if top > ram_top {
                ram_top = top;
            }
        }
    });

    if visited == 0 || ram_top == 0 {
        error!("[pmm] no usable memory map, cannot initialize");
        return Err(MmError::OutOfMemory);
    }

    let detected_ram_top = ram_top & !(PAGE_SIZE - 1);
    let total_pages = detected_ram_top / PAGE_SIZE;
    let word_count = bitmap_word_count(total_pages);

    // SAFETY: forwarded from this function's contract.
    let words =
        unsafe { core::slice::from_raw_parts_mut(kernel_end as *mut u32, word_count as usize) };
    words.fill(0xFFFF_FFFF);

    let mut bitmap = Bitmap {
        words,
        total_pages,
        free_pages: 0,
    };

    scan_mmap(info, |base, length, available| {
        if available && length != 0 {
            bitmap.mark_free(base, base + length);
        }
    });

    let bitmap_bytes = word_count * 4;
    let bitmap_end = page_align_up(kernel_end + bitmap_bytes);

    bitmap.mark_reserved(0, 0x0010_0000);
    bitmap.mark_reserved(0x0010_0000, bitmap_end);

    info!(
        "[pmm] total={} free={} bitmap_end={:#x}",
        total_pages, bitmap.free_pages, bitmap_end
    );

    let mut pmm = PMM.lock();
    pmm.bitmap = Some(bitmap);
    pmm.bitmap_end = bitmap_end;

    Ok(detected_ram_top)
}

pub fn alloc_page() -> Result<u32, MmError> {
    let mut pmm = PMM.lock();
    let bitmap = pmm.bitmap.as_mut().ok_or(MmError::OutOfMemory)?;
    bitmap.alloc_page()
}

pub fn free_page(addr: u32) -> Result<(), MmError> {
    let mut pmm = PMM.lock();
    let bitmap = pmm.bitmap.as_mut().ok_or(MmError::OutOfMemory)?;
    bitmap.free_page(addr)
}

/// Allocate `count` physically contiguous pages, or fail leaving the bitmap
/// untouched.
pub fn alloc_contiguous(count: u32) -> Result<u32, MmError> {
    let mut pmm = PMM.lock();
    let bitmap = pmm.bitmap.as_mut().ok_or(MmError::OutOfMemory)?;
    bitmap.alloc_contiguous(count)
}

pub fn total_pages() -> u32 {
    PMM.lock().bitmap.as_ref().map_or(0, |b| b.total_pages)
}

pub fn free_pages() -> u32 {
    PMM.lock().bitmap.as_ref().map_or(0, |b| b.free_pages)
}

pub fn bitmap_end() -> u32 {
    PMM.lock().bitmap_end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_bitmap(total_pages: u32, f: impl FnOnce(&mut Bitmap)) -> Bitmap {
        let word_count = bitmap_word_count(total_pages);
        let words: &'static mut [u32] =
            std::vec![0xFFFF_FFFFu32; word_count as usize].leak();
        let mut bitmap = Bitmap {
            words,
            total_pages,
            free_pages: 0,
        };
        f(&mut bitmap);
        bitmap
    }

    #[test]
    fn bitmap_word_count_rounds_up() {
        assert_eq!(bitmap_word_count(0), 0);
        assert_eq!(bitmap_word_count(1), 1);
        assert_eq!(bitmap_word_count(32), 1);
        assert_eq!(bitmap_word_count(33), 2);
    }

    #[test]
    fn page_align_up_rounds_to_page_boundary() {
        assert_eq!(page_align_up(0), 0);
        assert_eq!(page_align_up(1), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align_up(PAGE_SIZE + 1), 2 * PAGE_SIZE);
    }

    #[test]
    fn mark_free_then_reserved_conserves_total() {
        let bitmap = with_bitmap(64, |bitmap| {
            bitmap.mark_free(0, 64 * PAGE_SIZE);
            assert_eq!(bitmap.free_pages, 64);
            bitmap.mark_reserved(0, 4 * PAGE_SIZE);
            assert_eq!(bitmap.free_pages, 60);
        });
        let reserved = (0..bitmap.total_pages)
            .filter(|&p| bitmap.test(p))
            .count() as u32;
        assert_eq!(reserved + bitmap.free_pages, bitmap.total_pages);
    }

    #[test]
    fn set_and_clear_round_trip() {
        let bitmap = with_bitmap(64, |bitmap| {
            bitmap.mark_free(0, 64 * PAGE_SIZE);
            assert!(!bitmap.test(5));
            bitmap.set(5);
            assert!(bitmap.test(5));
            bitmap.clear(5);
            assert!(!bitmap.test(5));
        });
        let _ = bitmap;
    }

    #[test]
    fn alloc_page_returns_lowest_free_page_and_marks_it_used() {
        let bitmap = with_bitmap(64, |bitmap| {
            bitmap.mark_free(0, 64 * PAGE_SIZE);
            bitmap.mark_reserved(0, 2 * PAGE_SIZE);
            let addr = bitmap.alloc_page().unwrap();
            assert_eq!(addr, 2 * PAGE_SIZE);
            assert!(bitmap.test(2));
            assert_eq!(bitmap.free_pages, 61);
        });
        let _ = bitmap;
    }

    #[test]
    fn alloc_page_fails_when_bitmap_is_full() {
        let bitmap = with_bitmap(4, |bitmap| {
            assert!(matches!(bitmap.alloc_page(), Err(MmError::OutOfMemory)));
        });
        let _ = bitmap;
    }

    #[test]
    fn free_page_rejects_misaligned_address() {
        let bitmap = with_bitmap(64, |bitmap| {
            bitmap.mark_free(0, 64 * PAGE_SIZE);
            assert!(matches!(
                bitmap.free_page(1),
                Err(MmError::Misaligned { addr: 1 })
            ));
        });
        let _ = bitmap;
    }

    #[test]
    fn alloc_then_free_page_restores_free_count() {
        let bitmap = with_bitmap(64, |bitmap| {
            bitmap.mark_free(0, 64 * PAGE_SIZE);
            let addr = bitmap.alloc_page().unwrap();
            assert_eq!(bitmap.free_pages, 63);
            bitmap.free_page(addr).unwrap();
            assert_eq!(bitmap.free_pages, 64);
            assert!(!bitmap.test(addr / PAGE_SIZE));
        });
        let _ = bitmap;
    }

    #[test]
    fn alloc_contiguous_zero_is_rejected() {
        let bitmap = with_bitmap(64, |bitmap| {
            bitmap.mark_free(0, 64 * PAGE_SIZE);
            assert!(matches!(
                bitmap.alloc_contiguous(0),
                Err(MmError::ZeroLengthRequest)
            ));
        });
        let _ = bitmap;
    }

    #[test]
    fn alloc_contiguous_finds_a_run_past_a_reserved_gap() {
        let bitmap = with_bitmap(64, |bitmap| {
            bitmap.mark_free(0, 64 * PAGE_SIZE);
            // Reserve pages 4..6 so the first 4-page run starts at page 6.
            bitmap.mark_reserved(4 * PAGE_SIZE, 6 * PAGE_SIZE);
            let addr = bitmap.alloc_contiguous(4).unwrap();
            assert_eq!(addr, 6 * PAGE_SIZE);
            for page in 6..10 {
                assert!(bitmap.test(page));
            }
            assert_eq!(bitmap.free_pages, 58);
        });
        let _ = bitmap;
    }

    #[test]
    fn alloc_contiguous_fails_when_no_run_is_long_enough() {
        let bitmap = with_bitmap(8, |bitmap| {
            bitmap.mark_free(0, 8 * PAGE_SIZE);
            bitmap.mark_reserved(4 * PAGE_SIZE, 5 * PAGE_SIZE);
            assert!(matches!(
                bitmap.alloc_contiguous(8),
                Err(MmError::NoContiguousRun { requested_pages: 8 })
            ));
        });
        let _ = bitmap;
    }
}
