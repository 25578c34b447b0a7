//! Bare-metal test harness.
//!
//! Host builds (`cargo test` on `x86-unknown-linux-gnu` or similar) use the
//! standard `#[test]` harness against the pure-logic functions each module
//! exposes. This module only matters for `target_os = "none"`: it gives the
//! custom `#[test_runner]` a way to report pass/fail and exit without an
//! OS, the same shape as the teacher's `test_framework.rs` but exiting
//! through the QEMU isa-debug-exit port (0xF4) via this core's own `outb`
//! instead of the teacher's `x86_64` crate.

use core::panic::PanicInfo;

use crate::serial_println;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

#[cfg(all(test, target_os = "none"))]
pub fn test_runner(tests: &[&dyn Testable]) -> ! {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed)
}

/// Exit QEMU via the isa-debug-exit device at port 0xF4. Only meaningful
/// under `qemu-exit`; without it, park the core (there's no QEMU listening).
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    #[cfg(feature = "qemu-exit")]
    {
        crate::arch::x86::io::outb(0xF4, exit_code as u32 as u8);
    }
    #[cfg(not(feature = "qemu-exit"))]
    {
        let _ = exit_code;
    }

    loop {
        core::hint::spin_loop();
    }
}
