//! Device drivers.

pub mod keyboard;

/// Initialize all drivers. Registers IRQ handlers; must run before
/// [`crate::arch::x86::init`] unmasks interrupts.
pub fn init() {
    keyboard::init();
}
