//! First-fit, address-ordered kernel heap.
//!
//! In-band block headers, split-on-oversize, forward-only coalesce-on-free:
//! ported from `original_source/runtime/heap.c`. Wired up as the kernel's
//! `#[global_allocator]` the way the teacher's `mm/heap.rs` wires up
//! `linked_list_allocator::LockedHeap`, except this allocator is the one
//! actually implementing the spec's semantics rather than delegating to a
//! crate.

use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr::NonNull;

use log::info;
use spin::Mutex;

use crate::error::HeapError;

const ALIGN: usize = 8;
const MIN_ALLOC: usize = 8;

#[repr(C)]
struct Block {
    size: u32,
    is_free: u32,
    next: *mut Block,
}

const HEADER_SIZE: usize = size_of::<Block>();

fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

pub struct Heap {
    head: *mut Block,
    total_size: usize,
}

// SAFETY: all access goes through the `Mutex<Heap>` below; `Heap` itself is
// never touched concurrently.
unsafe impl Send for Heap {}

impl Heap {
    const fn empty() -> Self {
        Heap {
            head: core::ptr::null_mut(),
            total_size: 0,
        }
    }

    /// # Safety
    ///
    /// `base` must point at `size_bytes` bytes of memory exclusively owned
    /// by this heap for the remainder of the program.
    unsafe fn init(&mut self, base: usize, size_bytes: usize) {
        let aligned = align_up(base, ALIGN);
        let shrink = aligned - base;

        if size_bytes <= shrink + HEADER_SIZE + MIN_ALLOC {
            self.head = core::ptr::null_mut();
            self.total_size = 0;
            return;
        }

        let size_bytes = size_bytes - shrink;
        let head = aligned as *mut Block;
        // SAFETY: forwarded from this function's contract; `aligned` is
        // within the caller-provided region and has room for one `Block`.
        unsafe {
            (*head).size = (size_bytes - HEADER_SIZE) as u32;
            (*head).is_free = 1;
            (*head).next = core::ptr::null_mut();
        }
        self.head = head;
        self.total_size = size_bytes;
    }

    fn malloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if self.head.is_null() {
            return Err(HeapError::Uninitialized);
        }

        let size = size.max(1);
        let req = align_up(size, ALIGN).max(MIN_ALLOC) as u32;

        let mut cursor = self.head;
        // SAFETY: the free list is only ever built from blocks created by
        // `init`/split below, each a valid `Block` within heap storage.
        unsafe {
            while !cursor.is_null() {
                let blk = &mut *cursor;
                if blk.is_free != 0 && blk.size >= req {
                    if blk.size >= req + HEADER_SIZE as u32 + MIN_ALLOC as u32 {
                        let new_blk =
                            (cursor as *mut u8).add(HEADER_SIZE).add(req as usize) as *mut Block;
                        (*new_blk).size = blk.size - req - HEADER_SIZE as u32;
                        (*new_blk).is_free = 1;
                        (*new_blk).next = blk.next;
                        blk.size = req;
                        blk.next = new_blk;
                    }
                    blk.is_free = 0;
                    let data = (cursor as *mut u8).add(HEADER_SIZE);
                    return Ok(NonNull::new_unchecked(data));
                }
                cursor = blk.next;
            }
        }

        Err(HeapError::OutOfMemory { requested: size })
    }

    /// # Safety
    ///
    /// `ptr` must have been returned by a prior call to `malloc`/`calloc`/
    /// `realloc` on this same heap and not already freed.
    unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: forwarded from this function's contract.
        unsafe {
            let blk = (ptr as *mut Block).sub(1);
            (*blk).is_free = 1;

            loop {
                let next = (*blk).next;
                if next.is_null() || (*next).is_free == 0 {
                    break;
                }
                let blk_end = (blk as *mut u8).add(HEADER_SIZE).add((*blk).size as usize);
                if blk_end != next as *mut u8 {
                    break;
                }
                (*blk).size += HEADER_SIZE as u32 + (*next).size;
                (*blk).next = (*next).next;
            }
        }
    }

    /// # Safety
    ///
    /// `ptr`, if non-null, must have been returned by a prior allocation on
    /// this heap.
    unsafe fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> Result<*mut u8, HeapError> {
        if ptr.is_null() {
            return self.malloc(new_size).map(|p| p.as_ptr());
        }
        if new_size == 0 {
            // SAFETY: forwarded from this function's contract.
            unsafe {
                self.free(ptr);
            }
            return Ok(core::ptr::null_mut());
        }

        // SAFETY: forwarded from this function's contract.
        let old_size = unsafe { (*(ptr as *mut Block).sub(1)).size } as usize;
        if old_size >= new_size {
            return Ok(ptr);
        }

        let new_ptr = self.malloc(new_size)?.as_ptr();
        // SAFETY: `ptr` has `old_size` valid bytes; `new_ptr` has at least
        // that many (it was sized for `new_size > old_size`).
        unsafe {
            core::ptr::copy_nonoverlapping(ptr, new_ptr, old_size);
            self.free(ptr);
        }
        Ok(new_ptr)
    }

    fn dump(&self) {
        info!("[heap] dump size={:#x}", self.total_size);
        let mut cursor = self.head;
        // SAFETY: walking the same well-formed free list as `malloc`/`free`.
        unsafe {
            while !cursor.is_null() {
                let blk = &*cursor;
                info!(
                    "  blk {:p} size={:#x} {}",
                    cursor,
                    blk.size,
                    if blk.is_free != 0 { "free" } else { "used" }
                );
                cursor = blk.next;
            }
        }
    }
}

static HEAP: Mutex<Heap> = Mutex::new(Heap::empty());

pub fn dump() {
    HEAP.lock().dump();
}

pub fn calloc(count: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
    let total = count.checked_mul(size).ok_or(HeapError::SizeOverflow)?;
    let ptr = HEAP.lock().malloc(total)?;
    // SAFETY: `ptr` was just allocated with room for `total` bytes.
    unsafe {
        core::ptr::write_bytes(ptr.as_ptr(), 0, total);
    }
    Ok(ptr)
}

struct KernelHeapAllocator;

// SAFETY: `alloc`/`dealloc` only ever construct pointers returned by
// `Heap::malloc`/`free`, which themselves only ever hand out memory from
// the single region given to `init`.
unsafe impl GlobalAlloc for KernelHeapAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP.lock()
            .malloc(layout.size())
            .map(|p| p.as_ptr())
            .unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: forwarded from the `GlobalAlloc` contract.
        unsafe {
            HEAP.lock().free(ptr);
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: KernelHeapAllocator = KernelHeapAllocator;

/// Initialize the global kernel heap at [`crate::config::HEAP_START`].
///
/// # Safety
///
/// Must be called exactly once, after paging has mapped
/// `[HEAP_START, HEAP_START + HEAP_SIZE)` as writable memory.
pub unsafe fn init() {
    // SAFETY: forwarded from this function's contract.
    unsafe {
        HEAP.lock()
            .init(crate::config::HEAP_START, crate::config::HEAP_SIZE);
    }
    info!(
        "[heap] initialized {} KiB at {:#x}",
        crate::config::HEAP_SIZE / 1024,
        crate::config::HEAP_START
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn fresh_heap(size: usize) -> (Heap, std::vec::Vec<u8>) {
        let mut backing = std::vec![0u8; size];
        let mut heap = Heap::empty();
        let base = backing.as_mut_ptr() as usize;
        // SAFETY: `backing` lives at least as long as `heap` in this test.
        unsafe {
            heap.init(base, size);
        }
        (heap, backing)
    }

    #[test]
    fn malloc_respects_minimum_and_alignment() {
        let (mut heap, _backing) = fresh_heap(4096);
        let ptr = heap.malloc(1).unwrap();
        assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);
    }

    #[test]
    fn malloc_splits_oversize_blocks() {
        let (mut heap, _backing) = fresh_heap(4096);
        let first = heap.malloc(16).unwrap();
        // SAFETY: test-only inspection of heap-internal header.
        let header = unsafe { &*(first.as_ptr() as *mut Block).sub(1) };
        assert_eq!(header.size, 16);
        assert!(!header.next.is_null());
    }

    #[test]
    fn free_coalesces_adjacent_blocks() {
        let (mut heap, _backing) = fresh_heap(4096);
        let a = heap.malloc(32).unwrap();
        let b = heap.malloc(32).unwrap();
        // SAFETY: test-only pointers from this heap, freed exactly once.
        unsafe {
            heap.free(a.as_ptr());
            heap.free(b.as_ptr());
        }
        // After freeing both, the list should have coalesced back toward a
        // single free block, i.e. the head block now covers (almost) the
        // full heap.
        let head = unsafe { &*heap.head };
        assert_eq!(head.is_free, 1);
        assert!(head.next.is_null() || unsafe { (*head.next).is_free == 0 });
    }

    #[test]
    fn realloc_grows_and_copies_old_contents() {
        let (mut heap, _backing) = fresh_heap(4096);
        let ptr = heap.malloc(8).unwrap().as_ptr();
        // SAFETY: 8 bytes were just allocated.
        unsafe {
            core::ptr::write_bytes(ptr, 0xAB, 8);
        }
        // SAFETY: `ptr` came from this heap and is still live.
        let grown = unsafe { heap.realloc(ptr, 256).unwrap() };
        // SAFETY: `grown` has at least 8 valid bytes copied from `ptr`.
        let copied = unsafe { core::slice::from_raw_parts(grown, 8) };
        assert_eq!(copied, [0xAB; 8]);
    }

    #[test]
    fn realloc_in_place_when_block_already_big_enough() {
        let (mut heap, _backing) = fresh_heap(4096);
        let ptr = heap.malloc(64).unwrap().as_ptr();
        // SAFETY: `ptr` came from this heap.
        let same = unsafe { heap.realloc(ptr, 32).unwrap() };
        assert_eq!(ptr, same);
    }

    #[test]
    fn calloc_overflow_is_rejected() {
        let result = usize::MAX.checked_mul(2);
        assert!(result.is_none());
    }
}
