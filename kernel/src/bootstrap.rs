//! Bring-up orchestrator.
//!
//! Sequences subsystem initialization in the same order
//! `original_source/kernel/main.c`'s `kernel_main` brings up serial, then
//! validates the Multiboot contract, then the rest. Driver IRQ handlers are
//! registered before `arch::x86::init` unmasks interrupts and issues `sti`,
//! so nothing can fire into an unregistered handler. A failure at any stage
//! halts rather than limping on with a partially initialized kernel, the
//! same discipline as the original's `abort()` -> `halt_forever()`.

use log::{error, info};

use crate::arch::x86::multiboot::MultibootInfo;
use crate::error::KernelError;
use crate::{arch, drivers, logger, mm, serial};

extern "C" {
    /// Defined by the linker script, just past the kernel image's `.bss`.
    static _kernel_end: u8;
}

/// Park the core forever with interrupts disabled. The only way out is a
/// reset; used for unrecoverable boot failures and unhandled CPU exceptions.
pub(crate) fn halt_forever() -> ! {
    loop {
        // SAFETY: `cli`/`hlt` only affect this core's interrupt state and
        // execution; no memory access involved.
        unsafe {
            core::arch::asm!("cli", "hlt", options(nostack, nomem));
        }
    }
}

fn fail(stage: &str, err: KernelError) -> ! {
    error!("[boot] {stage} failed: {err}");
    halt_forever()
}

/// Entry point called by the Multiboot trampoline in
/// [`crate::arch::x86::multiboot`], with `eax`/`ebx` forwarded as `magic`/
/// `info`.
///
/// # Safety
///
/// Must only be called once, immediately after control transfer from the
/// bootloader, with `info` pointing at a Multiboot1 info struct the
/// bootloader placed in memory this kernel doesn't yet own (it's copied out
/// before any allocator runs).
#[no_mangle]
pub unsafe extern "C" fn kernel_main(magic: u32, info: *const MultibootInfo) -> ! {
    serial::init();
    logger::init();

    info!("ferrite-kernel booting");

    // SAFETY: forwarded from this function's contract: `info` was handed to
    // us by the bootloader before any of our own code ran.
    let info = unsafe { &*info };

    if let Err(e) = crate::arch::x86::multiboot::validate(magic, info) {
        fail("multiboot validation", e);
    }

    drivers::init();
    arch::x86::init();

    // SAFETY: `_kernel_end` is a linker-provided symbol marking the first
    // byte past the loaded kernel image; it has no type, only an address.
    let kernel_end = unsafe { &_kernel_end as *const u8 as u32 };
    // SAFETY: `kernel_end` is above the loaded kernel image and this is the
    // only call to `pmm::init` in the system.
    let ram_top = match unsafe { mm::pmm::init(kernel_end, info) } {
        Ok(top) => top,
        Err(e) => fail("physical memory manager", e.into()),
    };

    if let Err(e) = mm::paging::init(ram_top) {
        fail("paging", e.into());
    }

    let heap_pages = (crate::config::HEAP_SIZE as u32).div_ceil(mm::paging::PAGE_SIZE);
    let heap_phys_base = match mm::pmm::alloc_contiguous(heap_pages) {
        Ok(p) => p,
        Err(e) => fail("heap page allocation", e.into()),
    };
    for page in 0..heap_pages {
        let vaddr = crate::config::HEAP_START as u32 + page * mm::paging::PAGE_SIZE;
        let paddr = heap_phys_base + page * mm::paging::PAGE_SIZE;
        if let Err(e) = mm::paging::map_page(vaddr, paddr, mm::paging::PTE_WRITABLE) {
            fail("heap page mapping", e.into());
        }
    }

    // SAFETY: the heap region was just mapped writable above, and this is
    // the only call to `heap::init`.
    unsafe {
        mm::heap::init();
    }

    info!(
        "[boot] ready: {} free of {} pages",
        mm::pmm::free_pages(),
        mm::pmm::total_pages()
    );

    loop {
        if crate::drivers::keyboard::pop_event().is_some() {
            // Keyboard events are drained but otherwise unconsumed by this
            // core; a shell or higher layer would read them here.
        }
        // SAFETY: parks the core until the next interrupt; always safe.
        unsafe {
            core::arch::asm!("hlt", options(nostack, nomem));
        }
    }
}
