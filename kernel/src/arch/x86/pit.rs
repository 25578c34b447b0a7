//! 8253/8254 Programmable Interval Timer, channel 0.
//!
//! Programming sequence and heartbeat behavior grounded on
//! `original_source/arch/x86/pit.c`; the `AtomicU32` tick counter mirrors
//! the teacher's `arch/x86_64/timer.rs` `AtomicU64 TICKS` pattern.

use core::sync::atomic::{AtomicU32, Ordering};

use log::info;

use super::io::outb;

const BASE_FREQUENCY_HZ: u32 = 1_193_182;
const COMMAND_PORT: u16 = 0x43;
const CHANNEL0_PORT: u16 = 0x40;
const MODE_RATE_GENERATOR: u8 = 0x34;

static TICKS: AtomicU32 = AtomicU32::new(0);
static HEARTBEAT_RELOAD: AtomicU32 = AtomicU32::new(0);
static HEARTBEAT_COUNTDOWN: AtomicU32 = AtomicU32::new(0);

/// Compute the 16-bit PIT divisor for a requested frequency, clamped to the
/// range the hardware can represent. `hz == 0` is treated as 100 Hz, the
/// same default `original_source/arch/x86/pit.c` falls back to.
pub fn divisor_for(hz: u32) -> u16 {
    let hz = if hz == 0 { 100 } else { hz };
    let divisor = BASE_FREQUENCY_HZ / hz;
    divisor.clamp(1, 0xFFFF) as u16
}

fn program(hz: u32) {
    let divisor = divisor_for(hz);
    outb(COMMAND_PORT, MODE_RATE_GENERATOR);
    outb(CHANNEL0_PORT, (divisor & 0xFF) as u8);
    outb(CHANNEL0_PORT, ((divisor >> 8) & 0xFF) as u8);
}

/// Program the PIT and arm the tick/heartbeat counters. Does not unmask
/// IRQ0 or register the handler; the bring-up orchestrator does that once
/// every subsystem is ready.
pub fn init(hz: u32) {
    let hz = if hz == 0 { 100 } else { hz };
    TICKS.store(0, Ordering::Relaxed);
    HEARTBEAT_RELOAD.store(hz, Ordering::Relaxed);
    HEARTBEAT_COUNTDOWN.store(hz, Ordering::Relaxed);
    program(hz);
}

/// IRQ0 handler: advance the tick counter and log a heartbeat once the
/// countdown, reloaded to the configured frequency, reaches zero.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);

    let reload = HEARTBEAT_RELOAD.load(Ordering::Relaxed);
    if reload == 0 {
        return;
    }

    let prev = HEARTBEAT_COUNTDOWN.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
        Some(if c > 0 { c - 1 } else { 0 })
    });
    let remaining = prev.unwrap_or(0).saturating_sub(1);

    if remaining == 0 {
        info!("[pit] heartbeat");
        HEARTBEAT_COUNTDOWN.store(reload, Ordering::Relaxed);
    }
}

pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_clamps_to_hardware_range() {
        assert_eq!(divisor_for(100), 11931);
        assert_eq!(divisor_for(1), 0xFFFF); // would overflow 16 bits, clamp
        assert_eq!(divisor_for(1_193_182), 1);
        assert_eq!(divisor_for(10_000_000), 1); // rounds to 0, clamp to 1
    }

    #[test]
    fn zero_hz_defaults_to_100() {
        assert_eq!(divisor_for(0), divisor_for(100));
    }

    #[test]
    fn ticks_advance_on_each_call() {
        TICKS.store(0, Ordering::Relaxed);
        HEARTBEAT_RELOAD.store(0, Ordering::Relaxed);
        on_tick();
        on_tick();
        assert_eq!(ticks(), 2);
    }
}
