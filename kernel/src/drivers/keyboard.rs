//! PS/2 keyboard driver.
//!
//! Scancode decoding (E0 prefix, release bit, event word layout) ported from
//! `original_source/arch/x86/keyboard.c`. The ring buffer's atomic
//! head/tail split and the local-interrupt-disable discipline around `pop`
//! follow the same file's `irq_save_disable`/`irq_restore`; the buffer
//! shape itself mirrors the teacher's `drivers/keyboard.rs` `KeyBuffer`.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use log::info;

use crate::arch::x86::io::inb;
use crate::config::KEYBOARD_RING_SIZE;

const DATA_PORT: u16 = 0x60;
const STATUS_PORT: u16 = 0x64;
const STATUS_OUTPUT_FULL: u8 = 0x01;

pub const EVENT_VALID: u32 = 1 << 30;
pub const EVENT_RELEASE: u32 = 1 << 29;
pub const EVENT_EXTENDED: u32 = 1 << 28;
const SCANCODE_MASK: u32 = 0x7F;

static EXTENDED_PREFIX: AtomicBool = AtomicBool::new(false);

struct RingBuffer {
    slots: [AtomicU32; KEYBOARD_RING_SIZE],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl RingBuffer {
    const fn new() -> Self {
        const ZERO: AtomicU32 = AtomicU32::new(0);
        RingBuffer {
            slots: [ZERO; KEYBOARD_RING_SIZE],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn push(&self, event: u32) {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % KEYBOARD_RING_SIZE;
        let tail = self.tail.load(Ordering::Acquire);
        if next == tail {
            return; // full, drop the event
        }
        self.slots[head].store(event, Ordering::Relaxed);
        self.head.store(next, Ordering::Release);
    }

    fn pop(&self) -> Option<u32> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }
        let event = self.slots[tail].load(Ordering::Relaxed);
        self.tail
            .store((tail + 1) % KEYBOARD_RING_SIZE, Ordering::Release);
        Some(event)
    }
}

static RING: RingBuffer = RingBuffer::new();

/// Decode a raw scancode byte into an event word (or `None` if it was an
/// `0xE0` extended-prefix byte, which only sets state for the next byte).
/// Pure aside from the extended-prefix flag, so it's unit-testable without
/// touching any port.
fn decode_scancode(scancode: u8, extended_prefix: bool) -> (Option<u32>, bool) {
    if scancode == 0xE0 {
        return (None, true);
    }

    let mut event = EVENT_VALID | (u32::from(scancode) & SCANCODE_MASK);
    if extended_prefix {
        event |= EVENT_EXTENDED;
    }
    if scancode & 0x80 != 0 {
        event |= EVENT_RELEASE;
    }
    (Some(event), false)
}

fn irq1_handler(_frame: &crate::arch::x86::isr::InterruptFrame) {
    let status = inb(STATUS_PORT);
    if status & STATUS_OUTPUT_FULL == 0 {
        return;
    }

    let scancode = inb(DATA_PORT);
    let extended = EXTENDED_PREFIX.load(Ordering::Relaxed);
    let (event, next_extended) = decode_scancode(scancode, extended);
    EXTENDED_PREFIX.store(next_extended, Ordering::Relaxed);

    if let Some(event) = event {
        RING.push(event);
        info!(
            "[kbd] scancode={:#x} {}",
            scancode,
            if scancode & 0x80 != 0 { "release" } else { "press" }
        );
    }
}

/// Pop the oldest queued key event, if any. Disables interrupts locally for
/// the duration of the dequeue so the IRQ1 producer can't race a consumer
/// running with interrupts enabled.
pub fn pop_event() -> Option<u32> {
    let flags = crate::arch::x86::irq_save_disable();
    let event = RING.pop();
    crate::arch::x86::irq_restore(flags);
    event
}

pub fn init() {
    EXTENDED_PREFIX.store(false, Ordering::Relaxed);
    crate::arch::x86::isr::register_irq_handler(1, irq1_handler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_prefix_byte_sets_flag_and_emits_nothing() {
        let (event, extended) = decode_scancode(0xE0, false);
        assert!(event.is_none());
        assert!(extended);
    }

    #[test]
    fn plain_press_sets_valid_bit_only() {
        let (event, extended) = decode_scancode(0x1E, false); // 'a' make code
        assert_eq!(event, Some(EVENT_VALID | 0x1E));
        assert!(!extended);
    }

    #[test]
    fn release_sets_release_bit_and_masks_scancode() {
        let (event, _) = decode_scancode(0x9E, false); // 'a' break code
        assert_eq!(event, Some(EVENT_VALID | EVENT_RELEASE | 0x1E));
    }

    #[test]
    fn extended_key_sets_extended_bit_and_clears_prefix() {
        let (event, extended_after) = decode_scancode(0x4B, true); // left arrow
        assert_eq!(event, Some(EVENT_VALID | EVENT_EXTENDED | 0x4B));
        assert!(!extended_after);
    }

    #[test]
    fn ring_buffer_round_trips_in_order() {
        let ring = RingBuffer::new();
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn ring_buffer_drops_events_when_full() {
        let ring = RingBuffer::new();
        for i in 0..KEYBOARD_RING_SIZE as u32 + 5 {
            ring.push(i);
        }
        // One slot is always kept empty to distinguish full from empty, so
        // capacity is `KEYBOARD_RING_SIZE - 1`.
        let mut drained = 0;
        while ring.pop().is_some() {
            drained += 1;
        }
        assert_eq!(drained, KEYBOARD_RING_SIZE - 1);
    }
}
