//! 32-bit x86 protected-mode architecture backend: port I/O, the IDT/ISR
//! dispatcher, the 8259A PIC, the PIT timer, and Multiboot parsing.

use core::arch::asm;

pub mod idt;
pub mod io;
pub mod isr;
pub mod multiboot;
pub mod pic;
pub mod pit;

/// Saved CPU flags from [`irq_save_disable`], to be handed back to
/// [`irq_restore`].
#[derive(Clone, Copy)]
pub struct IrqFlags(u32);

/// Disable maskable interrupts locally and return the previous EFLAGS so the
/// caller can restore the prior interrupt-enabled state exactly.
pub fn irq_save_disable() -> IrqFlags {
    let flags: u32;
    // SAFETY: `pushfd`/`cli` only read/modify EFLAGS and the interrupt flag;
    // no memory safety implications.
    unsafe {
        asm!(
            "pushfd",
            "pop {flags}",
            "cli",
            flags = out(reg) flags,
            options(nostack)
        );
    }
    IrqFlags(flags)
}

/// Restore EFLAGS (in particular the interrupt flag) saved by a prior call
/// to [`irq_save_disable`].
pub fn irq_restore(flags: IrqFlags) {
    // SAFETY: restores a flags value this same call stack saved; does not
    // touch memory.
    unsafe {
        asm!(
            "push {flags}",
            "popfd",
            flags = in(reg) flags.0,
            options(nostack)
        );
    }
}

fn irq0_handler(_frame: &isr::InterruptFrame) {
    pit::on_tick();
}

/// Bring up every x86-specific subsystem: IDT gates, remap and mask the PIC,
/// program the PIT, and enable interrupts. Drivers (keyboard) register their
/// own IRQ handler before this runs; the timer's is wired up here since it
/// has no owning driver module of its own.
pub fn init() {
    idt::install_all_gates();
    idt::load();
    pic::init();
    pit::init(crate::config::PIT_FREQUENCY_HZ);
    isr::register_irq_handler(0, irq0_handler);

    pic::unmask(0);
    pic::unmask(1);

    // SAFETY: the IDT is loaded and the PIC is remapped, so external
    // interrupts are now safe to take.
    unsafe {
        asm!("sti", options(nostack));
    }
}
